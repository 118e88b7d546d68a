//! The live prevalent system
//!
//! `Prevalence` owns the recovered state and the transaction log. Every
//! mutation goes through [`Prevalence::execute`], which logs the transaction
//! and only then applies it, so the log is always at least as new as the
//! state.
//!
//! # Locking
//!
//! The log mutex is the serialization point. `execute` and `take_snapshot`
//! take it first and the state lock second; `read` takes only the state lock,
//! so queries never wait on disk I/O.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use prevail_core::{SequenceNumber, Subscriber, Transaction, Version};
use prevail_durability::{
    codec_for, DurabilityMode, FileTransactionLog, MemoryTransactionLog, Recovered,
    RecoveryCoordinator, SnapshotInfo, SnapshotStore, Subscription, TransactionLog,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{PrevalenceConfig, CONFIG_FILE_NAME};
use crate::error::{EngineError, EngineResult};

type SharedLog<T> = Arc<Mutex<Box<dyn TransactionLog<T>>>>;

/// Prevalent state `S` changed only by transactions `T`.
pub struct Prevalence<S, T> {
    /// Data directory, `None` when transient
    dir: Option<PathBuf>,
    state: RwLock<S>,
    log: SharedLog<T>,
    /// Version of `state`; written under the log lock
    version: AtomicU64,
    store: Option<SnapshotStore<S>>,
    clock: Box<dyn Clock>,
    flush_shutdown: Arc<AtomicBool>,
    flush_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<S, T> Prevalence<S, T>
where
    S: Send + Sync + 'static,
    T: Transaction<S> + 'static,
{
    /// Recover the system kept in `directory` and go live.
    ///
    /// Snapshots and the log share the directory. The configuration is
    /// written to `prevail.toml` once recovery succeeded, so a restart with
    /// [`open_from_config_file`](Self::open_from_config_file) picks up the
    /// same settings.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, another process holds the log,
    /// or recovery fails. Nothing is executed in any of these cases.
    pub fn open(
        directory: impl AsRef<Path>,
        initial_state: S,
        config: PrevalenceConfig,
    ) -> EngineResult<Self>
    where
        S: Serialize + DeserializeOwned,
        T: Serialize + DeserializeOwned + Clone + Send,
    {
        let dir = directory.as_ref();
        config.validate()?;
        let wal_config = config.wal_config()?;
        std::fs::create_dir_all(dir)?;

        let mut store = SnapshotStore::new(dir, codec_for::<S>(&config.codec)?)?;
        if let Some(suffix) = &config.snapshot_suffix {
            store = store.with_suffix(suffix.clone());
        }
        let log: FileTransactionLog<T> =
            FileTransactionLog::open(dir, codec_for::<T>(&config.codec)?, wal_config.clone())?;

        let recovered = RecoveryCoordinator::new(store, log).recover(initial_state)?;
        config.write_to_file(&dir.join(CONFIG_FILE_NAME))?;

        let mut prevalence = Self::from_recovered(recovered, SystemClock);
        if let DurabilityMode::Standard { interval_ms, .. } = wal_config.durability {
            prevalence.spawn_flusher(Duration::from_millis(interval_ms))?;
        }

        info!(
            target: "prevail::engine",
            dir = %dir.display(),
            version = prevalence.version(),
            codec = %config.codec,
            durability = wal_config.durability.description(),
            "Prevalence open"
        );
        Ok(prevalence)
    }

    /// Open `directory` with the settings in its `prevail.toml`.
    ///
    /// Writes the default file first if there is none.
    pub fn open_from_config_file(
        directory: impl AsRef<Path>,
        initial_state: S,
    ) -> EngineResult<Self>
    where
        S: Serialize + DeserializeOwned,
        T: Serialize + DeserializeOwned + Clone + Send,
    {
        let dir = directory.as_ref();
        std::fs::create_dir_all(dir)?;
        let config_path = dir.join(CONFIG_FILE_NAME);
        PrevalenceConfig::write_default_if_missing(&config_path)?;
        let config = PrevalenceConfig::from_file(&config_path)?;
        Self::open(dir, initial_state, config)
    }

    /// Go live with the outcome of a custom recovery.
    ///
    /// No background sync runs; a log with deferred syncs is flushed by
    /// [`flush`](Self::flush) and on drop.
    pub fn from_recovered<L>(recovered: Recovered<S, L>, clock: impl Clock + 'static) -> Self
    where
        L: TransactionLog<T> + 'static,
    {
        let version = recovered.version();
        let log: Box<dyn TransactionLog<T>> = Box::new(recovered.log);
        Prevalence {
            dir: Some(recovered.store.dir().to_path_buf()),
            state: RwLock::new(recovered.state),
            log: Arc::new(Mutex::new(log)),
            version: AtomicU64::new(version),
            store: Some(recovered.store),
            clock: Box::new(clock),
            flush_shutdown: Arc::new(AtomicBool::new(false)),
            flush_handle: Mutex::new(None),
        }
    }

    /// A system with an in-memory log and no snapshots.
    ///
    /// Behaves like a durable one while the process lives; everything is
    /// lost when it is dropped. The log keeps every transaction so a
    /// subscriber can replay from sequence 1, so memory grows with each
    /// `execute`. Use [`transient_with_retention`](Self::transient_with_retention)
    /// for long-lived systems.
    pub fn transient(initial_state: S) -> Self
    where
        T: Clone + Send,
    {
        Self::transient_with_log(initial_state, MemoryTransactionLog::starting_at(1))
    }

    /// Like [`transient`](Self::transient), but the log keeps only the
    /// newest `max_entries` transactions for replay.
    pub fn transient_with_retention(initial_state: S, max_entries: usize) -> Self
    where
        T: Clone + Send,
    {
        Self::transient_with_log(
            initial_state,
            MemoryTransactionLog::starting_at(1).with_retention(max_entries),
        )
    }

    fn transient_with_log(initial_state: S, log: MemoryTransactionLog<T>) -> Self
    where
        T: Clone + Send,
    {
        let log: Box<dyn TransactionLog<T>> = Box::new(log);
        Prevalence {
            dir: None,
            state: RwLock::new(initial_state),
            log: Arc::new(Mutex::new(log)),
            version: AtomicU64::new(0),
            store: None,
            clock: Box::new(SystemClock),
            flush_shutdown: Arc::new(AtomicBool::new(false)),
            flush_handle: Mutex::new(None),
        }
    }

    /// Replace the clock execution times are taken from.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Log `transaction`, then apply it. Returns its sequence number.
    ///
    /// # Errors
    ///
    /// If the log rejects the transaction it is not applied and the state is
    /// exactly as before the call.
    pub fn execute(&self, transaction: T) -> EngineResult<SequenceNumber> {
        let mut log = self.log.lock();
        let execution_time = self.clock.now();

        let sequence = match log.log(&transaction, execution_time) {
            Ok(sequence) => sequence,
            Err(e) => {
                warn!(
                    target: "prevail::engine",
                    error = %e,
                    "Transaction not logged, not applied"
                );
                return Err(e.into());
            }
        };

        transaction.execute_on(&mut self.state.write(), execution_time);
        self.version.store(sequence, Ordering::Release);
        Ok(sequence)
    }

    /// Run a query against the current state.
    pub fn read<R>(&self, query: impl FnOnce(&S) -> R) -> R {
        query(&self.state.read())
    }

    /// Write a snapshot of the current state.
    ///
    /// The log is flushed first, so a snapshot never covers entries that
    /// could still be lost from the log; otherwise restart after a power
    /// loss would find the log ending before the snapshot.
    ///
    /// The state is cloned under the locks and written after they are
    /// released, so transactions keep executing while the file is written.
    /// A failure is logged and returned; the system stays live and the log
    /// still holds everything.
    pub fn take_snapshot(&self) -> EngineResult<SnapshotInfo>
    where
        S: Clone,
    {
        let store = self.store.as_ref().ok_or(EngineError::SnapshotsUnavailable)?;

        let (state, version) = {
            let mut log = self.log.lock();
            let version = self.version.load(Ordering::Acquire);
            if let Err(e) = log.flush() {
                error!(
                    target: "prevail::engine",
                    version,
                    error = %e,
                    "Log flush before snapshot failed"
                );
                return Err(e.into());
            }
            (self.state.read().clone(), version)
        };

        match store.write(&state, version) {
            Ok(info) => {
                info!(
                    target: "prevail::engine",
                    version,
                    path = %info.path.display(),
                    "Snapshot taken"
                );
                Ok(info)
            }
            Err(e) => {
                error!(target: "prevail::engine", version, error = %e, "Snapshot failed");
                Err(e.into())
            }
        }
    }

    /// Deliver logged entries from `initial` on, then every new one.
    pub fn subscribe(
        &self,
        subscriber: Box<dyn Subscriber<T>>,
        initial: SequenceNumber,
    ) -> EngineResult<Subscription> {
        Ok(self.log.lock().subscribe(subscriber, initial)?)
    }

    /// Force every logged transaction to disk.
    pub fn flush(&self) -> EngineResult<()> {
        self.log.lock().flush()?;
        Ok(())
    }

    /// Number of transactions applied to the current state.
    pub fn version(&self) -> Version {
        self.version.load(Ordering::Acquire)
    }

    /// Sequence number the next transaction gets.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.version() + 1
    }

    /// Snapshot store, `None` when transient.
    pub fn snapshot_store(&self) -> Option<&SnapshotStore<S>> {
        self.store.as_ref()
    }

    /// Data directory, `None` when transient.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn spawn_flusher(&mut self, interval: Duration) -> EngineResult<()> {
        let log = Arc::clone(&self.log);
        let shutdown = Arc::clone(&self.flush_shutdown);

        let handle = std::thread::Builder::new()
            .name("prevail-wal-flush".to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    if let Err(e) = log.lock().sync_if_overdue() {
                        warn!(
                            target: "prevail::engine",
                            error = %e,
                            "Background WAL sync failed"
                        );
                    }
                }
            })?;
        *self.flush_handle.get_mut() = Some(handle);
        Ok(())
    }
}

impl<S, T> Drop for Prevalence<S, T> {
    fn drop(&mut self) {
        self.flush_shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.flush_handle.get_mut().take() {
            let _ = handle.join();
        }
        if let Err(e) = self.log.lock().flush() {
            warn!(target: "prevail::engine", error = %e, "Final WAL flush failed");
        }
    }
}

impl<S, T> std::fmt::Debug for Prevalence<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prevalence")
            .field("dir", &self.dir)
            .field("version", &self.version.load(Ordering::Relaxed))
            .field("transient", &self.store.is_none())
            .finish()
    }
}
