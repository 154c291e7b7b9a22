//! Value encoding seam.
//!
//! User-value serialization is treated as an opaque external concern.
//! Every place this workspace needs to turn a `T` into bytes for the KV
//! store (or back) takes one of these traits rather than assuming a
//! concrete format.

use crate::error::DecodeError;
use bytes::Bytes;

pub trait Encoder<T>: Send + Sync {
    fn encode(&self, value: &T) -> Bytes;
}

pub trait Decoder<T>: Send + Sync {
    fn decode(&self, key: &str, bytes: &[u8]) -> Result<T, DecodeError>;
}

/// Convenience bound for codecs that do both directions.
pub trait ValueCodec<T>: Encoder<T> + Decoder<T> {}
impl<T, C: Encoder<T> + Decoder<T>> ValueCodec<T> for C {}

/// Identity codec for callers that already work in raw bytes (e.g. the
/// HA-info map, which stores opaque user bytes verbatim).
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Encoder<Bytes> for BytesCodec {
    fn encode(&self, value: &Bytes) -> Bytes {
        value.clone()
    }
}

impl Decoder<Bytes> for BytesCodec {
    fn decode(&self, _key: &str, bytes: &[u8]) -> Result<Bytes, DecodeError> {
        Ok(Bytes::copy_from_slice(bytes))
    }
}
