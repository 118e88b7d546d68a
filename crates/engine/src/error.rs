//! Engine errors

use std::io;
use std::path::PathBuf;

use prevail_durability::{CodecError, LogError, RecoveryError, SnapshotError, WalConfigError};

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Filesystem failure outside the durability layer
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// `prevail.toml` could not be read, parsed or written
    #[error("Config file '{}': {detail}", .path.display())]
    ConfigFile {
        /// Config file path
        path: PathBuf,
        /// What went wrong
        detail: String,
    },

    /// A configuration value is not acceptable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// WAL settings rejected by validation
    #[error(transparent)]
    WalConfig(#[from] WalConfigError),

    /// Codec lookup or serialization failure
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Snapshot store failure
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Transaction log failure; the transaction was not applied
    #[error(transparent)]
    Log(#[from] LogError),

    /// Startup recovery failed; the system must not go live
    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    /// Snapshots requested on an engine without a snapshot store
    #[error("snapshots are not available on a transient prevalence")]
    SnapshotsUnavailable,
}

impl EngineError {
    pub(crate) fn config_file(path: impl Into<PathBuf>, detail: impl ToString) -> Self {
        EngineError::ConfigFile {
            path: path.into(),
            detail: detail.to_string(),
        }
    }

    /// Whether this error reports damaged persisted data.
    pub fn is_corruption(&self) -> bool {
        match self {
            EngineError::Recovery(e) => e.is_corruption(),
            EngineError::Log(e) => e.is_corruption(),
            EngineError::Snapshot(e) => e.is_corruption(),
            _ => false,
        }
    }
}
