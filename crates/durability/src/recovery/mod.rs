//! Startup recovery: latest snapshot plus log replay

mod coordinator;

pub use coordinator::{recover, Recovered, RecoveryCoordinator, RecoveryError, RecoveryStats};
