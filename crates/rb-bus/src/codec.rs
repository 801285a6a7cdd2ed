use serde_json::Value;
use thiserror::Error;

use rb_common::BusMessage;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

/// Converts payload values to and from their string wire form.
///
/// The trait stays object safe by moving values through
/// `serde_json::Value`; the typed glue lives in [`encode_message`] and
/// [`decode_message`]. Implementations must be symmetric:
/// `decode(encode(v)) == v` for every supported payload shape.
pub trait Codec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<String, CodecError>;
    fn decode(&self, raw: &str) -> Result<Value, CodecError>;
}

/// The default codec: compact JSON.
#[derive(Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(|e| CodecError::Serialize(e.to_string()))
    }

    fn decode(&self, raw: &str) -> Result<Value, CodecError> {
        serde_json::from_str(raw).map_err(|e| CodecError::Deserialize(e.to_string()))
    }
}

/// Serialize a typed payload to its wire form.
pub fn encode_message<M: BusMessage>(codec: &dyn Codec, message: &M) -> Result<String, CodecError> {
    let value = serde_json::to_value(message).map_err(|e| CodecError::Serialize(e.to_string()))?;
    codec.encode(&value)
}

/// Deserialize a typed payload from its wire form.
pub fn decode_message<M: BusMessage>(codec: &dyn Codec, raw: &str) -> Result<M, CodecError> {
    let value = codec.decode(raw)?;
    serde_json::from_value(value).map_err(|e| CodecError::Deserialize(e.to_string()))
}
