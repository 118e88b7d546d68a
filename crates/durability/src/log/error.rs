//! Transaction log errors

use std::path::PathBuf;

use prevail_core::SequenceNumber;

use crate::codec::CodecError;
use crate::wal::{WalConfigError, WalReaderError};

/// Errors from [`TransactionLog`](super::TransactionLog) operations.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The log could not be read or appended to. A failed `log` means the
    /// transaction was not recorded and must not be applied.
    #[error("transaction log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored entry failed its checksum, could not be decoded, or broke
    /// the sequence. Replay cannot continue past it.
    #[error("transaction log corrupted{}: {detail}", .segment.map(|s| format!(" in segment {}", s)).unwrap_or_default())]
    Corruption {
        /// Segment holding the damaged entry, for file-backed logs
        segment: Option<u64>,
        /// What was wrong
        detail: String,
    },

    /// The transaction could not be encoded; nothing was written
    #[error("failed to encode transaction: {0}")]
    Codec(#[from] CodecError),

    /// `log` was called on an empty log before any `update`/`subscribe`
    /// fixed the first sequence number
    #[error("no baseline: call update or subscribe with the first sequence number before logging")]
    BaselineNotEstablished,

    /// The caller's state is newer than anything the log holds
    #[error("replay requested from sequence {requested} but the log ends before {next}")]
    BaselineGap {
        /// Requested first sequence number
        requested: SequenceNumber,
        /// Sequence number the next logged entry will get
        next: SequenceNumber,
    },

    /// Entries the caller needs are no longer retained
    #[error("replay requested from sequence {requested} but the oldest retained entry is {first_available}")]
    MissingEntries {
        /// Requested first sequence number
        requested: SequenceNumber,
        /// Oldest sequence number still available
        first_available: SequenceNumber,
    },

    /// Another writer holds the log directory
    #[error("transaction log at {} is locked by another writer", .path.display())]
    Locked {
        /// Lock file
        path: PathBuf,
    },

    /// Invalid WAL configuration
    #[error("invalid WAL configuration: {0}")]
    Config(#[from] WalConfigError),
}

impl LogError {
    /// Whether the error means stored data is damaged.
    pub fn is_corruption(&self) -> bool {
        matches!(self, LogError::Corruption { .. })
    }
}

impl From<WalReaderError> for LogError {
    fn from(e: WalReaderError) -> Self {
        match e {
            WalReaderError::Io { source, .. } => LogError::Io(source),
            other => LogError::Corruption {
                segment: other.segment(),
                detail: other.to_string(),
            },
        }
    }
}
