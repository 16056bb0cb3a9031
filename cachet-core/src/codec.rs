//! Pluggable serialization of cache entries.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::CodecError;
use crate::sentinel::{CacheEntry, NullSentinel};

/// Marker trait for values that can pass through the cache.
pub trait Cacheable: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Cacheable for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Encodes entries to the bytes a store holds, and back.
///
/// Implementations must keep the null sentinel representable and
/// distinguishable from every encoded value.
pub trait Codec: Send + Sync {
    /// Encode an entry.
    fn encode<T: Serialize>(&self, entry: &CacheEntry<T>) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes previously produced by [`Codec::encode`].
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<CacheEntry<T>, CodecError>;

    /// Encode an optional value, using the sentinel for `None`.
    fn encode_option<T: Serialize>(&self, value: Option<&T>) -> Result<Vec<u8>, CodecError> {
        match value {
            Some(v) => self.encode(&CacheEntry::Value(v)),
            None => self.encode::<T>(&CacheEntry::null()),
        }
    }
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, entry: &CacheEntry<T>) -> Result<Vec<u8>, CodecError> {
        match entry {
            CacheEntry::Null(_) => Ok(NullSentinel::WIRE.to_vec()),
            CacheEntry::Value(value) => {
                serde_json::to_vec(value).map_err(|e| CodecError::Encode {
                    reason: e.to_string(),
                })
            }
        }
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<CacheEntry<T>, CodecError> {
        if NullSentinel::matches(bytes) {
            return Ok(CacheEntry::null());
        }
        serde_json::from_slice(bytes)
            .map(CacheEntry::Value)
            .map_err(|e| CodecError::Decode {
                reason: e.to_string(),
            })
    }
}
