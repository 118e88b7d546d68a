//! WAL configuration.

use super::DurabilityMode;

/// Smallest accepted segment size. Must hold a header and a small record.
pub const MIN_SEGMENT_SIZE: u64 = 1024;

/// WAL configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalConfig {
    /// Maximum segment size in bytes (default: 64MB).
    ///
    /// When an append would push the active segment past this size, a new
    /// segment is created first. A single record larger than this still
    /// gets a segment of its own.
    pub segment_size: u64,

    /// Bytes between fsyncs in Standard mode (default: 4MB).
    pub buffered_sync_bytes: u64,

    /// When appends are fsynced.
    pub durability: DurabilityMode,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            segment_size: 64 * 1024 * 1024,       // 64MB
            buffered_sync_bytes: 4 * 1024 * 1024, // 4MB
            durability: DurabilityMode::Always,
        }
    }
}

impl WalConfig {
    /// Create a new WAL configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set segment size (builder pattern).
    pub fn with_segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    /// Set buffered sync threshold (builder pattern).
    pub fn with_buffered_sync_bytes(mut self, bytes: u64) -> Self {
        self.buffered_sync_bytes = bytes;
        self
    }

    /// Set durability mode (builder pattern).
    pub fn with_durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), WalConfigError> {
        if self.segment_size < MIN_SEGMENT_SIZE {
            return Err(WalConfigError::SegmentSizeTooSmall);
        }
        if self.buffered_sync_bytes > self.segment_size {
            return Err(WalConfigError::BufferedSyncExceedsSegment);
        }
        if let DurabilityMode::Standard { batch_size, .. } = self.durability {
            if batch_size == 0 {
                return Err(WalConfigError::ZeroBatchSize);
            }
        }
        Ok(())
    }

    /// Create a configuration optimized for testing (small segments).
    pub fn for_testing() -> Self {
        WalConfig {
            segment_size: 64 * 1024,        // 64KB for faster rotation in tests
            buffered_sync_bytes: 16 * 1024, // 16KB
            durability: DurabilityMode::Always,
        }
    }
}

/// WAL configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalConfigError {
    /// Segment size is too small (minimum 1KB).
    #[error("Segment size must be at least 1KB")]
    SegmentSizeTooSmall,

    /// Buffered sync threshold exceeds segment size.
    #[error("Buffered sync threshold cannot exceed segment size")]
    BufferedSyncExceedsSegment,

    /// Standard mode with a batch size of zero.
    #[error("Standard durability batch size must be at least 1")]
    ZeroBatchSize,
}
