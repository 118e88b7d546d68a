//! Codec trait definitions.

use std::io::{self, Read, Write};

/// Default suffix of snapshot files.
pub const DEFAULT_SNAPSHOT_SUFFIX: &str = "snapshot";

/// Serialization capability for values of type `V`.
///
/// The snapshot store serializes prevalent state through a codec and the
/// file log serializes transactions through one. Neither knows the byte
/// format; any implementation of this pair is substitutable.
///
/// # Contract
///
/// Whatever bytes `write` emits, `read` on the same codec reconstructs an
/// observably equal value from them. `read` must fail, not guess, on bytes
/// it did not produce.
///
/// # Thread Safety
///
/// Codecs must be `Send + Sync` so a snapshot can be written from a
/// different thread than the one executing transactions.
pub trait Codec<V>: Send + Sync {
    /// Serialize `value` into `sink`.
    fn write(&self, value: &V, sink: &mut dyn Write) -> Result<(), CodecError>;

    /// Deserialize one value from `source`.
    fn read(&self, source: &mut dyn Read) -> Result<V, CodecError>;

    /// Unique codec identifier, used in configuration and diagnostics.
    fn codec_id(&self) -> &str;

    /// Suffix of snapshot files written with this codec.
    ///
    /// Distinct suffixes let snapshots of different formats share a
    /// directory without colliding.
    fn snapshot_suffix(&self) -> &str {
        DEFAULT_SNAPSHOT_SUFFIX
    }
}

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The sink or source failed underneath the codec.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The value could not be serialized.
    #[error("Encode error (codec={codec_id}): {detail}")]
    Encode {
        /// Codec ID that attempted the encode
        codec_id: String,
        /// Human-readable error description
        detail: String,
    },

    /// The bytes could not be deserialized (wrong format, truncated,
    /// type mismatch).
    #[error("Decode error (codec={codec_id}): {detail}")]
    Decode {
        /// Codec ID that attempted the decode
        codec_id: String,
        /// Human-readable error description
        detail: String,
    },

    /// Unknown codec identifier.
    #[error("Unknown codec: {0}")]
    UnknownCodec(String),
}

impl CodecError {
    /// Create an encode error with codec context.
    pub fn encode(codec_id: impl Into<String>, detail: impl Into<String>) -> Self {
        CodecError::Encode {
            codec_id: codec_id.into(),
            detail: detail.into(),
        }
    }

    /// Create a decode error with codec context.
    pub fn decode(codec_id: impl Into<String>, detail: impl Into<String>) -> Self {
        CodecError::Decode {
            codec_id: codec_id.into(),
            detail: detail.into(),
        }
    }
}
