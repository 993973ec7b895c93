//! Type-erased JSON codecs for tool payloads and results.

use std::any::Any;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use axon_types::CodecError;

/// A value crossing the codec boundary: either canonical JSON bytes or
/// a decoded typed value.
pub enum ToolValue {
    /// Canonical JSON bytes, not yet decoded.
    Bytes(Vec<u8>),
    /// A decoded typed value, owned by the tool's codec.
    Typed(Box<dyn Any + Send>),
}

impl ToolValue {
    /// Canonical JSON bytes from a `serde_json::Value`.
    pub fn json(value: &serde_json::Value) -> Self {
        // Value-to-bytes cannot fail.
        Self::Bytes(serde_json::to_vec(value).unwrap_or_default())
    }

    /// Wrap a typed value.
    pub fn typed<T: Send + 'static>(value: T) -> Self {
        Self::Typed(Box::new(value))
    }
}

impl std::fmt::Debug for ToolValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolValue::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            ToolValue::Typed(_) => f.debug_struct("Typed").finish_non_exhaustive(),
        }
    }
}

/// A typed JSON codec, erased so the registry can hold codecs for
/// arbitrary tools. Generated registration helpers instantiate
/// [`JsonCodec`] per payload/result type.
pub trait ToolCodec: Send + Sync {
    /// Encode a decoded typed value to canonical JSON.
    fn encode(&self, value: &(dyn Any + Send)) -> Result<Vec<u8>, CodecError>;

    /// Decode canonical JSON to the typed value.
    ///
    /// Decode errors are raw serde failures; [`crate::spec::TypeSpec::decode`]
    /// classifies them against the schema before they surface.
    fn decode(&self, raw: &[u8]) -> Result<Box<dyn Any + Send>, CodecError>;
}

/// The serde-backed codec for a concrete payload or result type.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Create the codec for `T`.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ToolCodec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn encode(&self, value: &(dyn Any + Send)) -> Result<Vec<u8>, CodecError> {
        if let Some(typed) = value.downcast_ref::<T>() {
            return serde_json::to_vec(typed).map_err(|e| CodecError::Encode(e.to_string()));
        }
        // Generic JSON values pass through so adapters can hand back
        // pre-shaped output.
        if let Some(json) = value.downcast_ref::<serde_json::Value>() {
            return serde_json::to_vec(json).map_err(|e| CodecError::Encode(e.to_string()));
        }
        Err(CodecError::TypeMismatch(
            std::any::type_name::<T>().to_owned(),
        ))
    }

    fn decode(&self, raw: &[u8]) -> Result<Box<dyn Any + Send>, CodecError> {
        let typed: T =
            serde_json::from_slice(raw).map_err(|e| CodecError::Syntax(e.to_string()))?;
        Ok(Box::new(typed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        name: String,
        count: u32,
    }

    #[test]
    fn round_trip() {
        let codec = JsonCodec::<Payload>::new();
        let original = Payload {
            name: "x".into(),
            count: 3,
        };
        let raw = codec.encode(&original as &(dyn Any + Send)).unwrap();
        let decoded = codec.decode(&raw).unwrap();
        assert_eq!(decoded.downcast_ref::<Payload>(), Some(&original));
    }

    #[test]
    fn type_mismatch_is_reported() {
        let codec = JsonCodec::<Payload>::new();
        let wrong: Box<dyn Any + Send> = Box::new(42u64);
        let err = codec.encode(wrong.as_ref()).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch(_)));
    }
}
