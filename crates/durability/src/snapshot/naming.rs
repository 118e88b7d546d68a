//! Snapshot file naming.
//!
//! The file name is the index: `<19-digit zero-padded version>.<suffix>`,
//! e.g. version 42 with the default suffix is `0000000000000000042.snapshot`.
//! Fixed width makes lexical order equal numeric order, and "latest" is the
//! maximum parsed version in a directory listing.

use std::path::{Path, PathBuf};

use prevail_core::Version;

/// Number of decimal digits in a snapshot file name.
pub const VERSION_WIDTH: usize = 19;

/// Largest version a snapshot file name can represent (`10^19 - 1`).
pub const MAX_SNAPSHOT_VERSION: Version = 9_999_999_999_999_999_999;

/// File name for the snapshot at `version`.
///
/// Returns `None` if the version does not fit in [`VERSION_WIDTH`] digits.
pub fn snapshot_file_name(version: Version, suffix: &str) -> Option<String> {
    if version > MAX_SNAPSHOT_VERSION {
        return None;
    }
    Some(format!("{:0width$}.{}", version, suffix, width = VERSION_WIDTH))
}

/// Path of the snapshot at `version` inside `dir`.
pub fn snapshot_path(dir: &Path, version: Version, suffix: &str) -> Option<PathBuf> {
    snapshot_file_name(version, suffix).map(|name| dir.join(name))
}

/// Parse the version out of a snapshot file name.
///
/// Returns `None` for anything that is not exactly 19 ASCII digits, a dot
/// and `suffix`. Other files in the directory are not snapshots.
pub fn parse_snapshot_version(file_name: &str, suffix: &str) -> Option<Version> {
    let digits = file_name.strip_suffix(suffix)?.strip_suffix('.')?;
    if digits.len() != VERSION_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Whether `file_name` is a temporary file left by a snapshot write with
/// this `suffix`.
pub(crate) fn is_temp_file_name(file_name: &str, suffix: &str) -> bool {
    file_name.starts_with('.')
        && file_name
            .strip_suffix(TEMP_EXTENSION)
            .and_then(|rest| rest.strip_suffix(suffix))
            .map_or(false, |rest| rest.ends_with('.'))
}

/// Prefix of the temporary file for `version`.
pub(crate) fn temp_prefix(version: Version) -> String {
    format!(".{:0width$}.", version, width = VERSION_WIDTH)
}

/// Suffix of temporary files (the random part sits between prefix and this).
pub(crate) fn temp_suffix(suffix: &str) -> String {
    format!(".{}{}", suffix, TEMP_EXTENSION)
}

const TEMP_EXTENSION: &str = ".tmp";
