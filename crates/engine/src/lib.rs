//! Live prevalence engine for Prevail
//!
//! This crate ties the durability layer to a running system:
//! - Prevalence: recovered state plus the log, serving `execute` and `read`
//! - Config: `prevail.toml` in the data directory
//! - Clock: where execution times come from
//!
//! The engine is the only component that applies transactions to live
//! state, and it only does so after the log accepted them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod error;
pub mod prevalence;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{PrevalenceConfig, CONFIG_FILE_NAME};
pub use error::{EngineError, EngineResult};
pub use prevalence::Prevalence;
