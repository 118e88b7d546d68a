//! Codecs built on serde data formats.
//!
//! Each codec is a unit struct implementing [`Codec<V>`] for every
//! `V: Serialize + DeserializeOwned`, so one instance serves both the
//! prevalent state and the transaction type.

use std::io::{self, Read, Write};

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::traits::{Codec, CodecError};

/// Compact binary codec (bincode). The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    /// Codec identifier
    pub const ID: &'static str = "bincode";
}

impl<V> Codec<V> for BincodeCodec
where
    V: Serialize + DeserializeOwned,
{
    fn write(&self, value: &V, sink: &mut dyn Write) -> Result<(), CodecError> {
        bincode::serialize_into(sink, value).map_err(|e| match *e {
            bincode::ErrorKind::Io(io) => CodecError::Io(io),
            other => CodecError::encode(Self::ID, other.to_string()),
        })
    }

    fn read(&self, source: &mut dyn Read) -> Result<V, CodecError> {
        let bytes = read_all(source)?;
        // Same layout as `serialize_into`, but no length prefix may claim
        // more than the input holds.
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .allow_trailing_bytes()
            .with_limit(bytes.len() as u64)
            .deserialize(&bytes)
            .map_err(|e| match *e {
                bincode::ErrorKind::Io(io) => read_io_error(Self::ID, io),
                other => CodecError::decode(Self::ID, other.to_string()),
            })
    }

    fn codec_id(&self) -> &str {
        Self::ID
    }
}

/// Structured-text codec (JSON).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Codec identifier
    pub const ID: &'static str = "json";
}

impl<V> Codec<V> for JsonCodec
where
    V: Serialize + DeserializeOwned,
{
    fn write(&self, value: &V, sink: &mut dyn Write) -> Result<(), CodecError> {
        serde_json::to_writer_pretty(sink, value).map_err(|e| {
            if e.is_io() {
                CodecError::Io(e.into())
            } else {
                CodecError::encode(Self::ID, e.to_string())
            }
        })
    }

    fn read(&self, source: &mut dyn Read) -> Result<V, CodecError> {
        serde_json::from_reader(source).map_err(|e| {
            if e.is_io() {
                read_io_error(Self::ID, e.into())
            } else {
                CodecError::decode(Self::ID, e.to_string())
            }
        })
    }

    fn codec_id(&self) -> &str {
        Self::ID
    }

    fn snapshot_suffix(&self) -> &str {
        "jsonsnapshot"
    }
}

/// MessagePack codec (field names preserved).
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Codec identifier
    pub const ID: &'static str = "msgpack";
}

impl<V> Codec<V> for MsgPackCodec
where
    V: Serialize + DeserializeOwned,
{
    fn write(&self, value: &V, sink: &mut dyn Write) -> Result<(), CodecError> {
        rmp_serde::encode::write_named(sink, value)
            .map_err(|e| CodecError::encode(Self::ID, e.to_string()))
    }

    fn read(&self, source: &mut dyn Read) -> Result<V, CodecError> {
        let bytes = read_all(source)?;
        rmp_serde::from_slice(&bytes).map_err(|e| CodecError::decode(Self::ID, e.to_string()))
    }

    fn codec_id(&self) -> &str {
        Self::ID
    }

    fn snapshot_suffix(&self) -> &str {
        "msgpacksnapshot"
    }
}

/// Buffer the whole source so length prefixes are checked against the
/// bytes actually present instead of driving allocations.
fn read_all(source: &mut dyn Read) -> Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::new();
    source.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Running out of input while decoding means the bytes are truncated,
/// which is a decode failure rather than an environment failure.
fn read_io_error(codec_id: &str, err: io::Error) -> CodecError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        CodecError::decode(codec_id, format!("truncated input: {}", err))
    } else {
        CodecError::Io(err)
    }
}

/// Resolve a codec by identifier.
pub fn codec_for<V>(codec_id: &str) -> Result<Box<dyn Codec<V>>, CodecError>
where
    V: Serialize + DeserializeOwned + 'static,
{
    match codec_id {
        BincodeCodec::ID => Ok(Box::new(BincodeCodec)),
        JsonCodec::ID => Ok(Box::new(JsonCodec)),
        MsgPackCodec::ID => Ok(Box::new(MsgPackCodec)),
        other => Err(CodecError::UnknownCodec(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Club {
        name: String,
        members: BTreeMap<u32, String>,
        founded: Option<u64>,
    }

    fn club() -> Club {
        let mut members = BTreeMap::new();
        members.insert(1, "Alice".to_string());
        members.insert(7, "Bob".to_string());
        Club {
            name: "Chess".to_string(),
            members,
            founded: Some(1999),
        }
    }

    fn all_codecs() -> Vec<Box<dyn Codec<Club>>> {
        vec![
            Box::new(BincodeCodec),
            Box::new(JsonCodec),
            Box::new(MsgPackCodec),
        ]
    }

    #[test]
    fn test_every_codec_reconstructs_what_it_wrote() {
        for codec in all_codecs() {
            let mut bytes = Vec::new();
            codec.write(&club(), &mut bytes).unwrap();
            let back = codec.read(&mut bytes.as_slice()).unwrap();
            assert_eq!(back, club(), "codec {}", codec.codec_id());
        }
    }

    #[test]
    fn test_truncated_input_is_decode_error() {
        for codec in all_codecs() {
            let mut bytes = Vec::new();
            codec.write(&club(), &mut bytes).unwrap();
            bytes.truncate(bytes.len() / 2);

            let result = codec.read(&mut bytes.as_slice());
            assert!(
                matches!(result, Err(CodecError::Decode { .. })),
                "codec {} gave {:?}",
                codec.codec_id(),
                result
            );
        }
    }

    #[test]
    fn test_oversized_length_prefix_is_decode_error() {
        // A string claiming 2^62 bytes followed by one byte of content
        let mut bincode_bytes = (1u64 << 62).to_le_bytes().to_vec();
        bincode_bytes.push(b'x');
        let result = Codec::<String>::read(&BincodeCodec, &mut bincode_bytes.as_slice());
        assert!(
            matches!(result, Err(CodecError::Decode { .. })),
            "bincode gave {:?}",
            result
        );

        // str32 claiming 4 GiB
        let msgpack_bytes = [0xdb, 0xff, 0xff, 0xff, 0xff, b'x'];
        let result = Codec::<String>::read(&MsgPackCodec, &mut msgpack_bytes.as_slice());
        assert!(
            matches!(result, Err(CodecError::Decode { .. })),
            "msgpack gave {:?}",
            result
        );

        // array32 claiming u32::MAX elements
        let msgpack_bytes = [0xdd, 0xff, 0xff, 0xff, 0xff, 0x01];
        let result = Codec::<Vec<u64>>::read(&MsgPackCodec, &mut msgpack_bytes.as_slice());
        assert!(matches!(result, Err(CodecError::Decode { .. })));
    }

    #[test]
    fn test_bincode_reads_legacy_serialize_into_layout() {
        let mut bytes = Vec::new();
        bincode::serialize_into(&mut bytes, &club()).unwrap();
        let back = Codec::<Club>::read(&BincodeCodec, &mut bytes.as_slice()).unwrap();
        assert_eq!(back, club());
    }

    #[test]
    fn test_json_is_structured_text() {
        let mut bytes = Vec::new();
        Codec::<Club>::write(&JsonCodec, &club(), &mut bytes).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"name\": \"Chess\""));
    }

    #[test]
    fn test_codec_for_resolves_known_ids() {
        for id in ["bincode", "json", "msgpack"] {
            let codec = codec_for::<Club>(id).unwrap();
            assert_eq!(codec.codec_id(), id);
        }
        assert!(matches!(
            codec_for::<Club>("xml"),
            Err(CodecError::UnknownCodec(id)) if id == "xml"
        ));
    }

    #[test]
    fn test_suffixes_are_distinct() {
        let suffixes: Vec<String> = all_codecs()
            .iter()
            .map(|c| c.snapshot_suffix().to_string())
            .collect();
        assert_eq!(suffixes, vec!["snapshot", "jsonsnapshot", "msgpacksnapshot"]);
    }
}
