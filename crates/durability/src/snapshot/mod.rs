//! Snapshot store
//!
//! - `naming`: canonical `<19-digit version>.<suffix>` file names
//! - `store`: crash-safe write, latest-version recovery
//! - `error`: snapshot error taxonomy

mod error;
pub mod naming;
mod store;

pub use error::SnapshotError;
pub use naming::{
    parse_snapshot_version, snapshot_file_name, MAX_SNAPSHOT_VERSION, VERSION_WIDTH,
};
pub use store::{RecoveredSnapshot, SnapshotInfo, SnapshotStore};
