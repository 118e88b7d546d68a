//! Segmented write-ahead log
//!
//! - `format`: segment header and record framing (WalSegment, WalRecord)
//! - `config`: WAL configuration (WalConfig, WalConfigError)
//! - `mode`: when appends are fsynced (DurabilityMode)
//! - `writer`: appends and rotation (WalWriter)
//! - `reader`: open-time scan and replay reads (WalReader)

pub mod config;
pub mod format;
pub mod mode;
pub mod reader;
pub mod writer;

pub use config::{WalConfig, WalConfigError};
pub use format::{SegmentHeader, WalRecord, WalRecordError, WalSegment};
pub use mode::DurabilityMode;
pub use reader::{
    ReadStopReason, SegmentRead, SegmentSummary, TruncateInfo, WalReader, WalReaderError, WalScan,
};
pub use writer::{WalCounters, WalWriter};
