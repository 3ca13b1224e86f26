//! Entry codec boundary.
//!
//! Persistent backends store entries as opaque byte blobs. The codec is
//! consumed as an interface so deployments can substitute their own wire
//! format; [`JsonCodec`] is the standard implementation.

use crate::{CacheEntry, CodecError};

/// Encodes cache entries to byte blobs and back.
///
/// Implementations must round-trip: `decode(encode(e)) == e` for any valid
/// entry. They must be cheap to share across the worker and backend tasks.
pub trait EntryCodec: Send + Sync {
    /// Encode an entry to the blob stored by the backend.
    fn encode(&self, entry: &CacheEntry) -> Result<Vec<u8>, CodecError>;

    /// Decode a blob previously produced by `encode`.
    fn decode(&self, blob: &[u8]) -> Result<CacheEntry, CodecError>;
}

/// JSON entry codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl EntryCodec for JsonCodec {
    fn encode(&self, entry: &CacheEntry) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(entry).map_err(|e| CodecError::Encode {
            reason: e.to_string(),
        })
    }

    fn decode(&self, blob: &[u8]) -> Result<CacheEntry, CodecError> {
        serde_json::from_slice(blob).map_err(|e| CodecError::Decode {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ElementAttributes;

    #[test]
    fn test_json_codec_roundtrip() {
        let codec = JsonCodec;
        let entry = CacheEntry::new(
            "user:42",
            vec![1u8, 2, 3],
            ElementAttributes {
                create_time_ms: 1_700_000_000_000,
                max_life_s: 300,
                is_eternal: false,
            },
        );

        let blob = codec.encode(&entry).expect("encode should succeed");
        let decoded = codec.decode(&blob).expect("decode should succeed");
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let codec = JsonCodec;
        let result = codec.decode(b"not json at all");
        assert!(matches!(result, Err(CodecError::Decode { .. })));
    }
}
