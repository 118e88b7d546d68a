//! Prevalence configuration via `prevail.toml`
//!
//! A default `prevail.toml` is created in the data directory on first open.
//! To change settings, edit the file and restart.

use std::path::Path;

use prevail_durability::{DurabilityMode, WalConfig};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Config file name placed in the data directory.
pub const CONFIG_FILE_NAME: &str = "prevail.toml";

/// Codec identifiers accepted in `codec`.
const KNOWN_CODECS: [&str; 3] = ["bincode", "json", "msgpack"];

/// Prevalence configuration loaded from `prevail.toml`.
///
/// # Example
///
/// ```toml
/// # "always" (default) = fsync every transaction, nothing acknowledged is lost
/// # "standard" = periodic fsync (~100ms), may lose the last interval on crash
/// durability = "always"
///
/// # Serialization of snapshots and log entries: "bincode", "json" or "msgpack"
/// codec = "bincode"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrevalenceConfig {
    /// Durability mode: `"always"` or `"standard"`.
    #[serde(default = "default_durability_str")]
    pub durability: String,
    /// Codec for snapshots and log entries.
    #[serde(default = "default_codec")]
    pub codec: String,
    /// WAL segment size in bytes. Defaults to 64 MB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_size: Option<u64>,
    /// Snapshot file suffix. Defaults to the codec's suffix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_suffix: Option<String>,
}

fn default_durability_str() -> String {
    "always".to_string()
}

fn default_codec() -> String {
    "bincode".to_string()
}

impl Default for PrevalenceConfig {
    fn default() -> Self {
        Self {
            durability: default_durability_str(),
            codec: default_codec(),
            segment_size: None,
            snapshot_suffix: None,
        }
    }
}

impl PrevalenceConfig {
    /// Parse the durability string into a `DurabilityMode`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `"always"` or `"standard"`.
    pub fn durability_mode(&self) -> EngineResult<DurabilityMode> {
        match self.durability.as_str() {
            "always" => Ok(DurabilityMode::Always),
            "standard" => Ok(DurabilityMode::standard_default()),
            other => Err(EngineError::InvalidConfig(format!(
                "Invalid durability mode '{}' in prevail.toml. Expected \"always\" or \"standard\".",
                other
            ))),
        }
    }

    /// Build and validate the WAL configuration.
    pub fn wal_config(&self) -> EngineResult<WalConfig> {
        let mut wal = WalConfig::new().with_durability(self.durability_mode()?);
        if let Some(size) = self.segment_size {
            wal = wal.with_segment_size(size);
            if wal.buffered_sync_bytes > size {
                wal = wal.with_buffered_sync_bytes(size);
            }
        }
        wal.validate()?;
        Ok(wal)
    }

    /// Check every value without opening anything.
    pub fn validate(&self) -> EngineResult<()> {
        if !KNOWN_CODECS.contains(&self.codec.as_str()) {
            return Err(EngineError::InvalidConfig(format!(
                "Unknown codec '{}' in prevail.toml. Expected one of {:?}.",
                self.codec, KNOWN_CODECS
            )));
        }
        if let Some(suffix) = &self.snapshot_suffix {
            if suffix.is_empty() || suffix.contains(['.', '/', '\\']) {
                return Err(EngineError::InvalidConfig(format!(
                    "Invalid snapshot_suffix '{}'. Use a non-empty name without dots or separators.",
                    suffix
                )));
            }
        }
        self.wal_config()?;
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Prevail configuration
#
# Durability mode: "always" (default) or "standard"
#   "always"   = fsync every transaction, nothing acknowledged is lost
#   "standard" = periodic fsync (~100ms), may lose the last interval on crash
durability = "always"

# Serialization of snapshots and log entries: "bincode" (default), "json" or "msgpack"
# Changing it makes existing snapshots and log entries unreadable.
codec = "bincode"

# WAL segment size in bytes (default: 64 MB)
# segment_size = 67108864

# Snapshot file suffix (default: depends on the codec)
# snapshot_suffix = "snapshot"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or holds an
    /// invalid value.
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::config_file(path, e))?;
        let config: PrevalenceConfig =
            toml::from_str(&content).map_err(|e| EngineError::config_file(path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> EngineResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())
                .map_err(|e| EngineError::config_file(path, e))?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> EngineResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| EngineError::config_file(path, e))?;
        std::fs::write(path, content).map_err(|e| EngineError::config_file(path, e))
    }
}
