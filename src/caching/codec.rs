use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{CacheContents, CacheError};

/// De/serialization contract for a cacheable payload type.
///
/// A codec converts payloads to and from the byte sequences that the disk
/// and remote tiers store, reports the cost a payload contributes to the
/// in-memory tier, and tags entries with a filename extension.
pub trait Codec<T>: Send + Sync + 'static {
    /// Encodes a payload into bytes.
    ///
    /// Failures surface as [`CacheError::NoData`].
    fn encode(&self, value: &T) -> CacheContents<Vec<u8>>;

    /// Decodes a payload from previously encoded bytes.
    ///
    /// Failures surface as [`CacheError::Malformed`].
    fn decode(&self, bytes: &[u8]) -> CacheContents<T>;

    /// The cost (in bytes) of keeping this payload in the in-memory tier.
    ///
    /// Defaults to the encoded length. Must be non-zero; a payload that
    /// decodes into something much larger than its encoded form (a bitmap,
    /// say) should override this.
    fn cost(&self, _value: &T, encoded_len: usize) -> u64 {
        (encoded_len as u64).max(1)
    }

    /// The file-kind tag used as the on-disk filename extension.
    fn extension(&self) -> &'static str;
}

/// Identity codec for raw byte payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec<Vec<u8>> for BytesCodec {
    fn encode(&self, value: &Vec<u8>) -> CacheContents<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> CacheContents<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn extension(&self) -> &'static str {
        "bin"
    }
}

/// Default codec for structured values, stored as JSON.
pub struct JsonCodec<T> {
    _payload: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        JsonCodec {
            _payload: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn encode(&self, value: &T) -> CacheContents<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CacheError::NoData(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> CacheContents<T> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Malformed(e.to_string()))
    }

    fn extension(&self) -> &'static str {
        "json"
    }
}
