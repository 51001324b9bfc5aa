//! Storage codec for persisted records
//!
//! Records are packed as MessagePack maps. Payloads larger than
//! [`COMPRESSION_THRESHOLD`] bytes are zstd-compressed and tagged with
//! [`ZSTD_MAGIC`] so readers can tell the formats apart without metadata.
//!
//! Decoding recognizes three shapes:
//! - `ZSTD:` followed by a zstd frame of MessagePack
//! - `ZLIB_B64:` followed by base64 of zlib-deflated JSON (legacy, read only)
//! - raw MessagePack

use std::io::{Cursor, Read};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::ZlibDecoder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub const ZSTD_MAGIC: &[u8] = b"ZSTD:";
pub const LEGACY_ZLIB_MAGIC: &[u8] = b"ZLIB_B64:";
pub const COMPRESSION_THRESHOLD: usize = 512;
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialize failed: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),

    #[error("Deserialize failed: {0}")]
    Deserialize(#[from] rmp_serde::decode::Error),

    #[error("Decompression failed: {0}")]
    Decompress(#[from] std::io::Error),

    #[error("Legacy payload unreadable: {0}")]
    Legacy(String),

    #[error("Empty payload")]
    Empty,
}

/// Pack a record, compressing it when it is large
pub fn encode<T: Serialize + ?Sized>(record: &T) -> Result<Vec<u8>, CodecError> {
    let packed = rmp_serde::to_vec_named(record)?;
    if packed.len() <= COMPRESSION_THRESHOLD {
        return Ok(packed);
    }

    let compressed = zstd::encode_all(Cursor::new(&packed), ZSTD_LEVEL)?;
    let mut out = Vec::with_capacity(ZSTD_MAGIC.len() + compressed.len());
    out.extend_from_slice(ZSTD_MAGIC);
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Unpack a record in any of the supported formats
pub fn try_decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }

    if let Some(body) = bytes.strip_prefix(LEGACY_ZLIB_MAGIC) {
        return decode_legacy(body);
    }

    if let Some(body) = bytes.strip_prefix(ZSTD_MAGIC) {
        let decompressed = zstd::decode_all(Cursor::new(body))?;
        return Ok(rmp_serde::from_slice(&decompressed)?);
    }

    Ok(rmp_serde::from_slice(bytes)?)
}

/// Unpack a record, falling back to the empty record on any failure
pub fn decode<T: DeserializeOwned + Default>(bytes: &[u8]) -> T {
    match try_decode(bytes) {
        Ok(record) => record,
        Err(CodecError::Empty) => T::default(),
        Err(e) => {
            tracing::warn!("Deserialization error: {}", e);
            T::default()
        }
    }
}

fn decode_legacy<T: DeserializeOwned>(body: &[u8]) -> Result<T, CodecError> {
    let compressed = STANDARD
        .decode(body)
        .map_err(|e| CodecError::Legacy(e.to_string()))?;

    let mut json = Vec::new();
    ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut json)?;

    serde_json::from_slice(&json).map_err(|e| CodecError::Legacy(e.to_string()))
}
