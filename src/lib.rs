//! Prevail - crash-durable prevalence for in-memory object models
//!
//! Keep the whole state in memory, change it only through deterministic
//! transactions, and let Prevail make it survive crashes: every transaction
//! is logged before it runs, snapshots capture the full state, and startup
//! recovery loads the latest snapshot and replays the log on top of it.
//!
//! # Quick Start
//!
//! ```ignore
//! use prevail::{Prevalence, PrevalenceConfig, Timestamp, Transaction};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Rename(String);
//!
//! impl Transaction<String> for Rename {
//!     fn execute_on(&self, state: &mut String, _at: Timestamp) {
//!         *state = self.0.clone();
//!     }
//! }
//!
//! let system = Prevalence::open("/path/to/data", "A".to_string(), PrevalenceConfig::default())?;
//! system.execute(Rename("B".into()))?;
//! system.take_snapshot()?;
//! ```
//!
//! # Architecture
//!
//! - `prevail-core`: transactions, log entries, versions and timestamps
//! - `prevail-durability`: codecs, snapshot store, transaction log, recovery
//! - `prevail-engine`: the live system and its configuration

pub use prevail_core::{LogEntry, SequenceNumber, Subscriber, Timestamp, Transaction, Version};
pub use prevail_durability::{
    recover, BincodeCodec, Codec, CodecError, DurabilityMode, FileTransactionLog, JsonCodec,
    LogError, MemoryTransactionLog, MsgPackCodec, Recovered, RecoveryCoordinator, RecoveryError,
    RecoveryStats, SnapshotError, SnapshotInfo, SnapshotStore, Subscription, TransactionLog,
    UpdateStats, WalConfig,
};
pub use prevail_engine::{
    Clock, EngineError, EngineResult, ManualClock, Prevalence, PrevalenceConfig, SystemClock,
};
