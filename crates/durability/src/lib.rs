//! Durability layer for Prevail
//!
//! This crate handles everything that touches disk:
//!
//! - Codec: pluggable serialization for states and transactions
//! - Snapshot store: versioned, crash-safe full-state snapshots
//! - WAL: segmented write-ahead log with CRC-framed records
//! - Transaction log: ordered, replayable log contract (file and in-memory)
//! - Recovery: latest snapshot plus log replay, handed off to the live system

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub(crate) mod fsutil;
pub mod log;
pub mod recovery;
pub mod snapshot;
pub mod wal;

// === Re-exports ===

// Codec
pub use codec::{
    codec_for, BincodeCodec, Codec, CodecError, JsonCodec, MsgPackCodec, DEFAULT_SNAPSHOT_SUFFIX,
};

// Snapshots
pub use snapshot::{RecoveredSnapshot, SnapshotError, SnapshotInfo, SnapshotStore};

// WAL
pub use wal::{DurabilityMode, WalConfig, WalConfigError};

// Transaction log
pub use log::{
    FileTransactionLog, LogError, MemoryTransactionLog, Subscription, TransactionLog, UpdateStats,
};

// Recovery
pub use recovery::{recover, Recovered, RecoveryCoordinator, RecoveryError, RecoveryStats};
