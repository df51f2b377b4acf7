//! Value encoding: JSON or MessagePack, with opportunistic gzip.
//!
//! Compressed payloads carry a `gzip:` marker prefix so readers pick the
//! right path; compression is kept only when it shrinks the payload below
//! 80% of the original.

use crate::config::{CacheConfig, SerializationFormat};
use crate::error::CacheError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use std::io::{Read, Write};

const GZIP_MARKER: &[u8] = b"gzip:";
const WORTHWHILE_RATIO: f64 = 0.8;

pub(crate) fn encode(value: &Value, config: &CacheConfig) -> Result<Vec<u8>, CacheError> {
    let serialized = match config.serialization_format {
        SerializationFormat::Json => serde_json::to_vec(value)
            .map_err(|e| CacheError::Serialization(e.to_string()))?,
        SerializationFormat::Binary => rmp_serde::to_vec(value)
            .map_err(|e| CacheError::Serialization(e.to_string()))?,
    };

    if config.compression_enabled && serialized.len() > config.compression_threshold {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&serialized)
            .and_then(|_| encoder.finish())
            .map_err(|e| CacheError::Serialization(e.to_string()))
            .map(|compressed| {
                let ratio = compressed.len() as f64 / serialized.len() as f64;
                if ratio < WORTHWHILE_RATIO {
                    let mut marked = Vec::with_capacity(GZIP_MARKER.len() + compressed.len());
                    marked.extend_from_slice(GZIP_MARKER);
                    marked.extend_from_slice(&compressed);
                    marked
                } else {
                    serialized
                }
            })
    } else {
        Ok(serialized)
    }
}

pub(crate) fn decode(raw: &[u8], config: &CacheConfig) -> Result<Value, CacheError> {
    let plain;
    let payload: &[u8] = if raw.starts_with(GZIP_MARKER) {
        let mut decoder = GzDecoder::new(&raw[GZIP_MARKER.len()..]);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        plain = decompressed;
        &plain
    } else {
        raw
    };

    match config.serialization_format {
        SerializationFormat::Json => serde_json::from_slice(payload).or_else(|json_err| {
            rmp_serde::from_slice(payload)
                .map_err(|_| CacheError::Serialization(json_err.to_string()))
        }),
        SerializationFormat::Binary => rmp_serde::from_slice(payload).or_else(|rmp_err| {
            serde_json::from_slice(payload)
                .map_err(|_| CacheError::Serialization(rmp_err.to_string()))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use serde_json::json;

    fn config(compression: bool, threshold: usize) -> CacheConfig {
        CacheConfig::builder()
            .compression_enabled(compression)
            .compression_threshold(threshold)
            .build()
    }

    #[test]
    fn small_values_stay_plain_json() {
        let config = config(true, 1024);
        let encoded = encode(&json!({"a": 1}), &config).unwrap();
        assert!(!encoded.starts_with(b"gzip:"));
        assert_eq!(decode(&encoded, &config).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn large_repetitive_values_get_compressed() {
        let config = config(true, 64);
        let value = json!({"body": "abcabcabc".repeat(200)});
        let encoded = encode(&value, &config).unwrap();
        assert!(encoded.starts_with(b"gzip:"));
        assert!(encoded.len() < serde_json::to_vec(&value).unwrap().len());
        assert_eq!(decode(&encoded, &config).unwrap(), value);
    }

    #[test]
    fn threshold_gated_payload_roundtrips() {
        let config = config(true, 16);
        let value = json!({ "noise": "0123456789".repeat(40) });
        let encoded = encode(&value, &config).unwrap();
        assert_eq!(decode(&encoded, &config).unwrap(), value);
    }

    #[test]
    fn compression_disabled_is_respected() {
        let config = config(false, 16);
        let value = json!({"body": "abc".repeat(500)});
        let encoded = encode(&value, &config).unwrap();
        assert!(!encoded.starts_with(b"gzip:"));
    }

    #[test]
    fn binary_format_roundtrips() {
        let config = CacheConfig::builder()
            .serialization_format(crate::config::SerializationFormat::Binary)
            .build();
        let value = json!({"nested": {"k": [1, 2, 3]}});
        let encoded = encode(&value, &config).unwrap();
        assert_eq!(decode(&encoded, &config).unwrap(), value);
    }
}
