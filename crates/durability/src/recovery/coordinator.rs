//! Recovery coordinator
//!
//! Recovery algorithm:
//! 1. Load the latest snapshot (or take the caller's initial state at version 0)
//! 2. Replay log entries from `snapshot version + 1`, in order, against it
//! 3. Hand the state, the next sequence number, the store and the log to
//!    the live system
//!
//! # Recovery Properties
//!
//! - **Deterministic**: Same snapshot and log -> same state
//! - **Ordered**: Each replayed entry must carry exactly the next sequence number
//! - **Atomic**: Either fully recovers or fails cleanly; a damaged snapshot
//!   or log entry never yields a silently shortened history
//!
//! # Example
//!
//! ```ignore
//! let store = SnapshotStore::new(dir, Box::new(BincodeCodec))?;
//! let log = FileTransactionLog::open(dir, Box::new(BincodeCodec), WalConfig::default())?;
//! let recovered = RecoveryCoordinator::new(store, log).recover(initial)?;
//! println!("Recovered {} entries", recovered.stats.entries_replayed);
//! ```

use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use prevail_core::{LogEntry, SequenceNumber, Transaction, Version};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::codec::BincodeCodec;
use crate::log::{FileTransactionLog, LogError, TransactionLog};
use crate::snapshot::{SnapshotError, SnapshotStore};
use crate::wal::WalConfig;

/// Recovery coordinator
///
/// Owns the snapshot store and the log while recovering. [`recover`]
/// consumes the coordinator, so there is no way to accept live
/// transactions before replay has drained.
///
/// [`recover`]: RecoveryCoordinator::recover
pub struct RecoveryCoordinator<S, T, L> {
    store: SnapshotStore<S>,
    log: L,
    _transaction: PhantomData<fn(T)>,
}

impl<S, T, L> RecoveryCoordinator<S, T, L>
where
    S: Send,
    T: Transaction<S>,
    L: TransactionLog<T>,
{
    /// Create a new recovery coordinator
    pub fn new(store: SnapshotStore<S>, log: L) -> Self {
        RecoveryCoordinator {
            store,
            log,
            _transaction: PhantomData,
        }
    }

    /// Snapshot directory
    pub fn dir(&self) -> &Path {
        self.store.dir()
    }

    /// Load the latest snapshot, replay the log on top of it, go live.
    pub fn recover(self, initial_state: S) -> Result<Recovered<S, L>, RecoveryError> {
        let RecoveryCoordinator {
            store, mut log, ..
        } = self;

        let snapshot = store.initialize(initial_state)?;
        let mut state = snapshot.state;
        let first = snapshot.version + 1;

        let mut expected = first;
        let mut out_of_order = None;
        let mut replay = |entry: &LogEntry<T>| {
            if entry.sequence != expected {
                out_of_order = Some(entry.sequence);
                return ControlFlow::Break(());
            }
            entry.execute_on(&mut state);
            expected += 1;
            ControlFlow::Continue(())
        };
        log.update(&mut replay, first)?;

        if let Some(found) = out_of_order {
            return Err(RecoveryError::OutOfOrder { expected, found });
        }

        let next_sequence = expected;
        if log.next_sequence() != Some(next_sequence) {
            return Err(RecoveryError::IncompleteReplay {
                replayed_to: next_sequence,
                log_next: log.next_sequence(),
            });
        }

        let stats = RecoveryStats {
            snapshot_version: snapshot.version,
            snapshot_path: snapshot.path,
            entries_replayed: next_sequence - first,
            last_replayed: (next_sequence > first).then(|| next_sequence - 1),
        };

        info!(
            target: "prevail::recovery",
            snapshot_version = stats.snapshot_version,
            entries_replayed = stats.entries_replayed,
            next_sequence,
            "Recovery complete"
        );

        Ok(Recovered {
            state,
            snapshot_version: stats.snapshot_version,
            next_sequence,
            stats,
            store,
            log,
        })
    }
}

/// Everything the live system needs after recovery.
pub struct Recovered<S, L> {
    /// Reconstructed prevalent state
    pub state: S,
    /// Version of the snapshot recovery started from (0 if none)
    pub snapshot_version: Version,
    /// Sequence number the next logged transaction gets
    pub next_sequence: SequenceNumber,
    /// What recovery did
    pub stats: RecoveryStats,
    /// Snapshot store, for periodic snapshots
    pub store: SnapshotStore<S>,
    /// Log, positioned for appending
    pub log: L,
}

impl<S, L> Recovered<S, L> {
    /// Version of the recovered state: the number of transactions applied.
    pub fn version(&self) -> Version {
        self.next_sequence - 1
    }
}

impl<S, L> std::fmt::Debug for Recovered<S, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recovered")
            .field("snapshot_version", &self.snapshot_version)
            .field("next_sequence", &self.next_sequence)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Recovery statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Version of the loaded snapshot (0 if none was found)
    pub snapshot_version: Version,
    /// File the snapshot was loaded from
    pub snapshot_path: Option<PathBuf>,
    /// Log entries replayed on top of the snapshot
    pub entries_replayed: u64,
    /// Sequence number of the last replayed entry
    pub last_replayed: Option<SequenceNumber>,
}

/// Recover the state kept in `directory`.
///
/// Uses the bincode codec for both snapshots and log entries, keeps the log
/// in the same directory as the snapshots and fsyncs every append. Returns
/// the recovered state and the next sequence number.
///
/// The log is closed again before returning. Keep [`Recovered`] from
/// [`RecoveryCoordinator::recover`] instead to continue logging.
pub fn recover<S, T>(
    initial_state: S,
    directory: impl AsRef<Path>,
) -> Result<(S, SequenceNumber), RecoveryError>
where
    S: Serialize + DeserializeOwned + Send + 'static,
    T: Transaction<S> + Serialize + DeserializeOwned + Clone + 'static,
{
    let directory = directory.as_ref();
    let store = SnapshotStore::new(directory, Box::new(BincodeCodec))?;
    let log: FileTransactionLog<T> =
        FileTransactionLog::open(directory, Box::new(BincodeCodec), WalConfig::default())?;

    let recovered = RecoveryCoordinator::new(store, log).recover(initial_state)?;
    Ok((recovered.state, recovered.next_sequence))
}

/// Recovery errors
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// Snapshot directory unreadable or latest snapshot corrupt
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Log unreadable, corrupt, or unable to supply the needed entries
    #[error("Transaction log error: {0}")]
    Log(#[from] LogError),

    /// The log delivered an entry other than the next one
    #[error("Replay out of order: expected entry {expected}, got {found}")]
    OutOfOrder {
        /// Sequence number that should have come next
        expected: SequenceNumber,
        /// Sequence number that was delivered
        found: SequenceNumber,
    },

    /// Replay stopped before the end of the log
    #[error("Replay stopped before entry {replayed_to}; log continues to {log_next:?}")]
    IncompleteReplay {
        /// Sequence number replay would have continued with
        replayed_to: SequenceNumber,
        /// The log's next sequence number
        log_next: Option<SequenceNumber>,
    },
}

impl RecoveryError {
    /// Whether recovery failed because stored data is damaged.
    pub fn is_corruption(&self) -> bool {
        match self {
            RecoveryError::Snapshot(e) => e.is_corruption(),
            RecoveryError::Log(e) => e.is_corruption(),
            RecoveryError::OutOfOrder { .. } | RecoveryError::IncompleteReplay { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::log::MemoryTransactionLog;
    use prevail_core::Timestamp;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Append(u32);

    impl Transaction<Vec<u32>> for Append {
        fn execute_on(&self, state: &mut Vec<u32>, _execution_time: Timestamp) {
            state.push(self.0);
        }
    }

    /// Delivers whatever it holds regardless of the requested start.
    struct SloppyLog(Vec<LogEntry<Append>>);

    impl TransactionLog<Append> for SloppyLog {
        fn log(&mut self, _: &Append, _: Timestamp) -> Result<SequenceNumber, LogError> {
            Err(LogError::BaselineNotEstablished)
        }

        fn update(
            &mut self,
            subscriber: &mut dyn prevail_core::Subscriber<Append>,
            _initial: SequenceNumber,
        ) -> Result<crate::log::UpdateStats, LogError> {
            for entry in &self.0 {
                if subscriber.receive(entry).is_break() {
                    break;
                }
            }
            Ok(Default::default())
        }

        fn subscribe(
            &mut self,
            _: Box<dyn prevail_core::Subscriber<Append>>,
            _: SequenceNumber,
        ) -> Result<crate::log::Subscription, LogError> {
            Err(LogError::BaselineNotEstablished)
        }

        fn next_sequence(&self) -> Option<SequenceNumber> {
            Some(self.0.len() as u64 + 1)
        }
    }

    fn store(dir: &Path) -> SnapshotStore<Vec<u32>> {
        SnapshotStore::new(dir, Box::new(JsonCodec)).unwrap()
    }

    #[test]
    fn test_empty_everything() {
        let dir = tempdir().unwrap();
        let log = MemoryTransactionLog::<Append>::new();

        let recovered = RecoveryCoordinator::new(store(dir.path()), log)
            .recover(vec![9])
            .unwrap();

        assert_eq!(recovered.state, vec![9]);
        assert_eq!(recovered.snapshot_version, 0);
        assert_eq!(recovered.next_sequence, 1);
        assert_eq!(recovered.version(), 0);
        assert_eq!(recovered.stats.entries_replayed, 0);
        assert_eq!(recovered.log.next_sequence(), Some(1));
    }

    #[test]
    fn test_snapshot_plus_log_tail() {
        let dir = tempdir().unwrap();
        store(dir.path()).write(&vec![1, 2], 2).unwrap();

        let mut log = MemoryTransactionLog::new();
        let mut ignore = |_: &LogEntry<Append>| ControlFlow::Continue(());
        log.update(&mut ignore, 1).unwrap();
        for n in 1..=4 {
            log.log(&Append(n), Timestamp::EPOCH).unwrap();
        }

        let recovered = RecoveryCoordinator::new(store(dir.path()), log)
            .recover(Vec::new())
            .unwrap();

        assert_eq!(recovered.state, vec![1, 2, 3, 4]);
        assert_eq!(recovered.snapshot_version, 2);
        assert_eq!(recovered.next_sequence, 5);
        assert_eq!(recovered.stats.entries_replayed, 2);
        assert_eq!(recovered.stats.last_replayed, Some(4));
    }

    #[test]
    fn test_out_of_order_delivery_aborts() {
        let dir = tempdir().unwrap();
        let log = SloppyLog(vec![
            LogEntry::new(1, Append(1), Timestamp::EPOCH),
            LogEntry::new(3, Append(3), Timestamp::EPOCH),
        ]);

        let err = RecoveryCoordinator::new(store(dir.path()), log)
            .recover(Vec::new())
            .unwrap_err();
        assert!(matches!(
            err,
            RecoveryError::OutOfOrder {
                expected: 2,
                found: 3
            }
        ));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_log_missing_entries_after_snapshot() {
        let dir = tempdir().unwrap();
        store(dir.path()).write(&vec![1], 1).unwrap();

        let mut log = MemoryTransactionLog::new();
        let mut ignore = |_: &LogEntry<Append>| ControlFlow::Continue(());
        log.update(&mut ignore, 5).unwrap();
        log.log(&Append(5), Timestamp::EPOCH).unwrap();

        let err = RecoveryCoordinator::new(store(dir.path()), log)
            .recover(Vec::new())
            .unwrap_err();
        assert!(matches!(
            err,
            RecoveryError::Log(LogError::MissingEntries {
                requested: 2,
                first_available: 5
            })
        ));
    }

    #[test]
    fn test_snapshot_newer_than_log() {
        let dir = tempdir().unwrap();
        store(dir.path()).write(&vec![1, 2, 3], 3).unwrap();

        let mut log = MemoryTransactionLog::new();
        let mut ignore = |_: &LogEntry<Append>| ControlFlow::Continue(());
        log.update(&mut ignore, 1).unwrap();
        log.log(&Append(1), Timestamp::EPOCH).unwrap();

        let err = RecoveryCoordinator::new(store(dir.path()), log)
            .recover(Vec::new())
            .unwrap_err();
        assert!(matches!(
            err,
            RecoveryError::Log(LogError::BaselineGap { .. })
        ));
    }

    #[test]
    fn test_corrupt_snapshot_is_fatal() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("0000000000000000004.jsonsnapshot"),
            b"{not json",
        )
        .unwrap();

        let err = RecoveryCoordinator::new(store(dir.path()), MemoryTransactionLog::<Append>::new())
            .recover(vec![0])
            .unwrap_err();
        assert!(matches!(err, RecoveryError::Snapshot(_)));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_convenience_recover_on_empty_directory() {
        let dir = tempdir().unwrap();
        let (state, next) = recover::<Vec<u32>, Append>(vec![7], dir.path()).unwrap();
        assert_eq!(state, vec![7]);
        assert_eq!(next, 1);
    }
}
