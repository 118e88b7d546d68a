//! Serialization capability shared by snapshots and the transaction log.
//!
//! - `traits`: the [`Codec`] contract and [`CodecError`]
//! - `serde_codecs`: bincode (default), JSON and MessagePack codecs

mod serde_codecs;
mod traits;

pub use serde_codecs::{codec_for, BincodeCodec, JsonCodec, MsgPackCodec};
pub use traits::{Codec, CodecError, DEFAULT_SNAPSHOT_SUFFIX};
