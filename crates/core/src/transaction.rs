//! Transactions, log entries and subscribers
//!
//! A transaction is the only way prevalent state changes. It is logged
//! before it runs and may be run again during replay, so it must be a pure
//! function of the prior state and the execution time it is handed:
//!
//! - no reading the system clock (use `execution_time`)
//! - no random numbers
//! - no calls to external services
//!
//! Breaking any of these makes a recovered state diverge from the state the
//! live system had before the crash.

use std::ops::ControlFlow;

use crate::{SequenceNumber, Timestamp};

/// A deterministic, serializable unit of mutation over prevalent state `S`.
///
/// Serializability is expressed by the codec used to log it, not by this
/// trait, so any `serde` type can be logged.
pub trait Transaction<S>: Send {
    /// Apply this transaction to `state` as of `execution_time`.
    fn execute_on(&self, state: &mut S, execution_time: Timestamp);
}

/// One durable record of the transaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry<T> {
    /// Position in the log; strictly increasing with no gaps
    pub sequence: SequenceNumber,
    /// The logged transaction
    pub transaction: T,
    /// Time the transaction was (and will again be) executed at
    pub execution_time: Timestamp,
}

impl<T> LogEntry<T> {
    /// Create a new log entry
    pub fn new(sequence: SequenceNumber, transaction: T, execution_time: Timestamp) -> Self {
        LogEntry {
            sequence,
            transaction,
            execution_time,
        }
    }

    /// Execute the contained transaction against `state` at the logged time.
    pub fn execute_on<S>(&self, state: &mut S)
    where
        T: Transaction<S>,
    {
        self.transaction.execute_on(state, self.execution_time);
    }
}

/// Receives log entries in ascending sequence order.
///
/// Returning `ControlFlow::Break(())` ends the subscription; no further
/// entries are delivered to this subscriber.
///
/// Any `FnMut(&LogEntry<T>) -> ControlFlow<()>` closure is a subscriber.
pub trait Subscriber<T>: Send {
    /// Receive one entry
    fn receive(&mut self, entry: &LogEntry<T>) -> ControlFlow<()>;
}

impl<T, F> Subscriber<T> for F
where
    F: FnMut(&LogEntry<T>) -> ControlFlow<()> + Send,
{
    fn receive(&mut self, entry: &LogEntry<T>) -> ControlFlow<()> {
        self(entry)
    }
}
