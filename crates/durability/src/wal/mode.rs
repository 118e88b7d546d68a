//! Durability mode configuration
//!
//! Controls when WAL appends are fsynced (Always, Standard).

/// Durability mode for WAL operations
///
/// # Modes
///
/// | Mode | fsync | Data Loss Window |
/// |------|-------|-----------------|
/// | Always | Every append | Zero |
/// | Standard | Periodic | Up to interval/batch |
///
/// In both modes an entry is never reported as durable before it has been
/// fsynced; see `FileTransactionLog::durable_through`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// fsync after every append (the default)
    ///
    /// `log` does not return until the entry is on disk.
    #[default]
    Always,

    /// fsync every N appends OR every T milliseconds
    ///
    /// A crash may lose up to `batch_size` entries or `interval_ms` worth of
    /// entries. Those entries were never reported durable.
    Standard {
        /// Maximum time between fsyncs in milliseconds
        interval_ms: u64,
        /// Maximum appends between fsyncs
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// Check if this mode requires immediate fsync on every append
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Always)
    }

    /// Human-readable description of the mode
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::Always => "Always sync (safest, slowest)",
            DurabilityMode::Standard { .. } => "Standard (balanced speed/safety)",
        }
    }

    /// Standard mode with recommended defaults
    ///
    /// Returns `Standard { interval_ms: 100, batch_size: 1000 }`. Whichever
    /// threshold is reached first triggers the fsync.
    pub fn standard_default() -> Self {
        DurabilityMode::Standard {
            interval_ms: 100,
            batch_size: 1000,
        }
    }
}
