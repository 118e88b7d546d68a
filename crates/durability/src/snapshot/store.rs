//! Versioned snapshot store
//!
//! Persists full-state snapshots, one file per version, directly inside a
//! directory, and recovers the most recent one at startup.
//!
//! # Crash Safety
//!
//! Writing follows the write-fsync-rename pattern:
//! 1. Serialize into a temporary file in the snapshot directory
//!    (`.NNNNNNNNNNNNNNNNNNN.<random>.<suffix>.tmp`)
//! 2. fsync the temporary file
//! 3. Atomic rename over the canonical name (`NNNNNNNNNNNNNNNNNNN.<suffix>`)
//! 4. fsync the directory
//!
//! The temporary file lives in the same directory so the rename never
//! crosses a filesystem. Either the complete snapshot is visible under the
//! canonical name or the previous occupant (or nothing) is.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use prevail_core::Version;
use tracing::{info, warn};

use super::error::SnapshotError;
use super::naming::{
    is_temp_file_name, parse_snapshot_version, snapshot_path, temp_prefix, temp_suffix,
};
use crate::codec::{Codec, CodecError};
use crate::fsutil::sync_dir;

/// Durable, versioned storage of full-state snapshots.
pub struct SnapshotStore<S> {
    dir: PathBuf,
    codec: Box<dyn Codec<S>>,
    suffix: String,
}

impl<S> SnapshotStore<S> {
    /// Create a store over `dir`, creating the directory if needed.
    ///
    /// The file suffix defaults to the codec's snapshot suffix.
    pub fn new(dir: impl Into<PathBuf>, codec: Box<dyn Codec<S>>) -> Result<Self, SnapshotError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| SnapshotError::io(&dir, e))?;
        let suffix = codec.snapshot_suffix().to_string();
        Ok(SnapshotStore { dir, codec, suffix })
    }

    /// Override the snapshot file suffix.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Snapshot directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot file suffix
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Identifier of the codec snapshots are written with
    pub fn codec_id(&self) -> &str {
        self.codec.codec_id()
    }

    /// Canonical path of the snapshot at `version`.
    pub fn snapshot_path(&self, version: Version) -> Result<PathBuf, SnapshotError> {
        snapshot_path(&self.dir, version, &self.suffix)
            .ok_or(SnapshotError::VersionOutOfRange(version))
    }

    /// Recover the most recent snapshot.
    ///
    /// Returns `initial_state` at version 0 if no snapshot file matches.
    /// Otherwise deserializes the highest version found. An unreadable
    /// snapshot is an error, never a fallback to `initial_state`.
    pub fn initialize(&self, initial_state: S) -> Result<RecoveredSnapshot<S>, SnapshotError> {
        match self.cleanup_temp_files() {
            Ok(0) => {}
            Ok(removed) => warn!(
                target: "prevail::snapshot",
                removed,
                dir = %self.dir.display(),
                "Removed temporary files left by interrupted snapshot writes"
            ),
            Err(e) => warn!(
                target: "prevail::snapshot",
                error = %e,
                "Could not remove temporary snapshot files"
            ),
        }

        let Some(version) = self.latest_version()? else {
            info!(
                target: "prevail::snapshot",
                dir = %self.dir.display(),
                "No snapshot found, starting from initial state"
            );
            return Ok(RecoveredSnapshot {
                state: initial_state,
                version: 0,
                path: None,
            });
        };

        let path = self.snapshot_path(version)?;
        let state = self.read(version)?;
        info!(
            target: "prevail::snapshot",
            version,
            path = %path.display(),
            "Loaded snapshot"
        );
        Ok(RecoveredSnapshot {
            state,
            version,
            path: Some(path),
        })
    }

    /// All snapshot versions present, ascending.
    ///
    /// Files that do not match the canonical name for this store's suffix
    /// are ignored.
    pub fn list_versions(&self) -> Result<Vec<Version>, SnapshotError> {
        let list_err = |source| SnapshotError::ListDirectory {
            path: self.dir.clone(),
            source,
        };

        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(list_err)? {
            let entry = entry.map_err(list_err)?;
            let name = entry.file_name();
            if let Some(version) = name
                .to_str()
                .and_then(|n| parse_snapshot_version(n, &self.suffix))
            {
                versions.push(version);
            }
        }

        versions.sort_unstable();
        Ok(versions)
    }

    /// Highest snapshot version present, if any.
    pub fn latest_version(&self) -> Result<Option<Version>, SnapshotError> {
        Ok(self.list_versions()?.last().copied())
    }

    /// Deserialize the snapshot at `version`.
    pub fn read(&self, version: Version) -> Result<S, SnapshotError> {
        let path = self.snapshot_path(version)?;
        let file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SnapshotError::NotFound {
                version,
                path: path.clone(),
            },
            _ => SnapshotError::io(&path, e),
        })?;

        let mut reader = BufReader::new(file);
        self.codec.read(&mut reader).map_err(|e| match e {
            CodecError::Io(source) => SnapshotError::io(&path, source),
            source => SnapshotError::Corrupt {
                version,
                path: path.clone(),
                source,
            },
        })
    }

    /// Write `state` as the snapshot for `version`.
    ///
    /// Atomically creates or replaces the canonical file. On any failure
    /// the canonical file is left as it was before the call and the
    /// temporary file is removed. Repeated writes of one version are
    /// last-writer-wins; callers should use strictly increasing versions.
    pub fn write(&self, state: &S, version: Version) -> Result<SnapshotInfo, SnapshotError> {
        let final_path = self.snapshot_path(version)?;
        let prefix = temp_prefix(version);
        let suffix = temp_suffix(&self.suffix);

        // Step 1: Write to temporary file (removed on drop unless persisted)
        let mut temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(&suffix)
            .tempfile_in(&self.dir)
            .map_err(|e| SnapshotError::io(&self.dir, e))?;
        let temp_path = temp.path().to_path_buf();

        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            self.codec
                .write(state, &mut writer)
                .map_err(|e| match e {
                    CodecError::Io(source) => SnapshotError::io(&temp_path, source),
                    source => SnapshotError::Encode { version, source },
                })?;
            writer
                .flush()
                .map_err(|e| SnapshotError::io(&temp_path, e))?;
        }

        // Step 2: fsync the file
        temp.as_file()
            .sync_all()
            .map_err(|e| SnapshotError::io(&temp_path, e))?;
        let bytes = temp
            .as_file()
            .metadata()
            .map_err(|e| SnapshotError::io(&temp_path, e))?
            .len();

        // Step 3: Atomic rename, replacing any previous occupant
        temp.persist(&final_path)
            .map_err(|e| SnapshotError::io(&final_path, e.error))?;

        // Step 4: fsync parent directory
        sync_dir(&self.dir).map_err(|e| SnapshotError::io(&self.dir, e))?;

        info!(
            target: "prevail::snapshot",
            version,
            bytes,
            path = %final_path.display(),
            "Snapshot written"
        );

        Ok(SnapshotInfo {
            version,
            path: final_path,
            bytes,
        })
    }

    /// Remove temporary files left behind by interrupted writes.
    ///
    /// Only temporary files for this store's suffix are touched.
    pub fn cleanup_temp_files(&self) -> Result<usize, SnapshotError> {
        let mut count = 0;

        let entries = fs::read_dir(&self.dir).map_err(|e| SnapshotError::io(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| SnapshotError::io(&self.dir, e))?;
            let is_temp = entry
                .file_name()
                .to_str()
                .map_or(false, |n| is_temp_file_name(n, &self.suffix));
            if is_temp {
                fs::remove_file(entry.path()).map_err(|e| SnapshotError::io(entry.path(), e))?;
                count += 1;
            }
        }

        Ok(count)
    }
}

impl<S> std::fmt::Debug for SnapshotStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("dir", &self.dir)
            .field("codec", &self.codec.codec_id())
            .field("suffix", &self.suffix)
            .finish()
    }
}

/// Result of [`SnapshotStore::initialize`]
#[derive(Debug)]
pub struct RecoveredSnapshot<S> {
    /// Deserialized snapshot, or the caller's initial state
    pub state: S,
    /// Version of `state` (0 if no snapshot was found)
    pub version: Version,
    /// File the state was loaded from
    pub path: Option<PathBuf>,
}

/// Information about a written snapshot
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    /// Version the snapshot represents
    pub version: Version,
    /// Canonical path of the snapshot file
    pub path: PathBuf,
    /// Size of the snapshot file in bytes
    pub bytes: u64,
}
