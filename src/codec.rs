//! Pluggable JSON codec.
//!
//! Document payloads cross the database boundary as JSON bytes. The
//! [`Codec`] seam lets callers swap the byte representation (for example a
//! SIMD JSON implementation) without touching the document model; the
//! structural mapping between typed documents and JSON objects is handled
//! by the derive layer and is codec-independent.

use serde_json::Value;

/// Marshals and unmarshals JSON values to and from bytes.
pub trait Codec: Send + Sync {
    fn marshal(&self, value: &Value) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>;
    fn unmarshal(&self, data: &[u8]) -> Result<Value, Box<dyn std::error::Error + Send + Sync>>;
}

/// The default codec, backed by serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn marshal(&self, value: &Value) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        Ok(serde_json::from_slice(data)?)
    }
}
