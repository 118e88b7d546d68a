//! Transaction log
//!
//! An append-only, strictly ordered record of `(sequence, transaction,
//! execution time)` entries with replay from any retained sequence number.
//!
//! Two implementations share one contract:
//! - [`FileTransactionLog`]: segmented WAL on disk
//! - [`MemoryTransactionLog`]: no persistence, for transient systems and tests
//!
//! # Baseline
//!
//! A log that holds entries knows the next sequence number. A log with no
//! entries does not: the first `update` or `subscribe` call fixes it to that
//! call's `initial` argument, and `log` fails until that has happened.

mod error;
mod file;
mod memory;
mod subscription;

pub use error::LogError;
pub use file::{FileTransactionLog, LOCK_FILE_NAME};
pub use memory::MemoryTransactionLog;
pub use subscription::Subscription;

use prevail_core::{SequenceNumber, Subscriber, Timestamp};

/// Outcome of an [`TransactionLog::update`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    /// Entries handed to the subscriber
    pub delivered: u64,
    /// Sequence number of the last delivered entry
    pub last_delivered: Option<SequenceNumber>,
    /// The subscriber returned `ControlFlow::Break` before the end
    pub stopped: bool,
}

impl UpdateStats {
    pub(crate) fn record(&mut self, sequence: SequenceNumber) {
        self.delivered += 1;
        self.last_delivered = Some(sequence);
    }
}

/// Ordered, replayable record of transactions.
///
/// Implementations serialize writers: `log` takes `&mut self`, so no two
/// appends are ever in flight and every subscriber sees entries in one
/// total order.
pub trait TransactionLog<T>: Send {
    /// Record `transaction` at the next sequence number and return that number.
    ///
    /// On success the entry is visible to every later `update` and has been
    /// delivered to live subscribers. On failure nothing was recorded and the
    /// transaction must not be applied.
    fn log(
        &mut self,
        transaction: &T,
        execution_time: Timestamp,
    ) -> Result<SequenceNumber, LogError>;

    /// Deliver every retained entry with sequence `>= initial`, in order.
    ///
    /// On a log with no entries this establishes the baseline: the next
    /// logged entry gets sequence `initial`. Delivery stops early if the
    /// subscriber returns `ControlFlow::Break`.
    fn update(
        &mut self,
        subscriber: &mut dyn Subscriber<T>,
        initial: SequenceNumber,
    ) -> Result<UpdateStats, LogError>;

    /// Like [`update`](Self::update), then keep delivering each newly logged
    /// entry until the returned [`Subscription`] ends.
    fn subscribe(
        &mut self,
        subscriber: Box<dyn Subscriber<T>>,
        initial: SequenceNumber,
    ) -> Result<Subscription, LogError>;

    /// Sequence number the next logged entry gets, `None` before a baseline.
    fn next_sequence(&self) -> Option<SequenceNumber>;

    /// Force every logged entry to stable storage.
    fn flush(&mut self) -> Result<(), LogError> {
        Ok(())
    }

    /// Sync if a deferred sync is due. Returns whether it synced.
    fn sync_if_overdue(&mut self) -> Result<bool, LogError> {
        Ok(false)
    }
}

/// Reject replay requests the log cannot satisfy.
///
/// Returns `false` when `initial == next`, i.e. there is nothing to deliver.
pub(crate) fn check_replay_start(
    initial: SequenceNumber,
    next: SequenceNumber,
) -> Result<bool, LogError> {
    if initial > next {
        return Err(LogError::BaselineGap {
            requested: initial,
            next,
        });
    }
    Ok(initial < next)
}
