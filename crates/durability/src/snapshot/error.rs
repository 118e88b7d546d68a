//! Snapshot store errors.

use std::io;
use std::path::PathBuf;

use prevail_core::Version;

use crate::codec::CodecError;

/// Snapshot store errors
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Environment-level failure (disk full, permission denied, rename
    /// failed). The canonical file for the version is left as it was.
    #[error("Snapshot I/O error at {path}: {source}")]
    Io {
        /// File or directory the operation touched
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The snapshot directory could not be listed, so the latest
    /// snapshot cannot be determined.
    #[error("Cannot list snapshot directory {path}: {source}")]
    ListDirectory {
        /// Snapshot directory
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// A snapshot file exists but cannot be deserialized.
    ///
    /// Fatal for recovery: falling back to the initial state would
    /// silently discard history.
    #[error("Corrupt snapshot at version {version} ({path}): {source}")]
    Corrupt {
        /// Version of the unreadable snapshot
        version: Version,
        /// Path of the unreadable snapshot
        path: PathBuf,
        /// Decode failure
        #[source]
        source: CodecError,
    },

    /// The state could not be serialized.
    #[error("Cannot encode snapshot at version {version}: {source}")]
    Encode {
        /// Version being written
        version: Version,
        /// Encode failure
        #[source]
        source: CodecError,
    },

    /// Version does not fit the fixed-width file name.
    #[error("Snapshot version {0} exceeds the maximum representable version")]
    VersionOutOfRange(Version),

    /// No snapshot file exists for the requested version.
    #[error("No snapshot at version {version} ({path})")]
    NotFound {
        /// Requested version
        version: Version,
        /// Expected path
        path: PathBuf,
    },
}

impl SnapshotError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SnapshotError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is a data integrity failure.
    pub fn is_corruption(&self) -> bool {
        matches!(self, SnapshotError::Corrupt { .. })
    }
}
