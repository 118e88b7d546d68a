//! Filesystem helpers shared by the snapshot store and the WAL.

use std::io;
use std::path::Path;

/// fsync a directory so that file creations and renames inside it survive a
/// crash. A no-op where directories cannot be opened for syncing.
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
