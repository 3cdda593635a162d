//! Payload values and the encode/decode functions.

use serde::Serialize;

use crate::error::CodecError;
use crate::format::{ByteOrder, FormatTag, NumericKind};

/// A payload value of one of the supported kinds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// An opaque byte sequence.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
    /// A 32-bit float.
    Float(f32),
    /// A 32-bit signed integer.
    Int(i32),
}

impl Value {
    /// Returns the short name of this value's kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::Float(_) => "float",
            Self::Int(_) => "int",
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

/// Converts a dynamically-typed JSON scalar into a payload value.
///
/// Strings become text, integers that fit in `i32` become ints, and other
/// finite numbers within `f32` range become floats. Everything else has no
/// payload encoding.
impl TryFrom<serde_json::Value> for Value {
    type Error = CodecError;

    fn try_from(v: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value as Json;

        match v {
            Json::String(s) => Ok(Self::Text(s)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if let Ok(small) = i32::try_from(i) {
                        return Ok(Self::Int(small));
                    }
                }
                match n.as_f64() {
                    Some(f) if f.is_finite() && f.abs() <= f64::from(f32::MAX) => {
                        Ok(Self::Float(f as f32))
                    }
                    _ => Err(CodecError::UnsupportedPayloadKind(format!(
                        "number {n} is outside the 32-bit range"
                    ))),
                }
            }
            Json::Null => Err(CodecError::UnsupportedPayloadKind("null".to_string())),
            Json::Bool(_) => Err(CodecError::UnsupportedPayloadKind("bool".to_string())),
            Json::Array(_) => Err(CodecError::UnsupportedPayloadKind("array".to_string())),
            Json::Object(_) => Err(CodecError::UnsupportedPayloadKind("object".to_string())),
        }
    }
}

/// A payload ready to be persisted: the `data` blob and its format tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// The encoded payload bytes.
    pub data: Vec<u8>,
    /// The tag that tells a reader how to decode `data`.
    pub format: FormatTag,
}

impl Encoded {
    /// Decodes this payload back into a value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::DecodeError` if the bytes do not match the tag.
    pub fn decode(&self) -> Result<Value, CodecError> {
        decode_tagged(&self.data, self.format)
    }
}

/// Encodes a value into its persisted form.
///
/// Numeric values are always written little-endian with the bare `f` / `i`
/// tags.
pub fn encode(value: &Value) -> Encoded {
    match value {
        Value::Bytes(b) => Encoded {
            data: b.clone(),
            format: FormatTag::Raw,
        },
        Value::Text(s) => Encoded {
            data: s.as_bytes().to_vec(),
            format: FormatTag::Utf8,
        },
        Value::Float(f) => Encoded {
            data: f.to_le_bytes().to_vec(),
            format: FormatTag::FLOAT32,
        },
        Value::Int(i) => Encoded {
            data: i.to_le_bytes().to_vec(),
            format: FormatTag::INT32,
        },
    }
}

/// Decodes a persisted payload using its format tag string.
///
/// # Errors
///
/// Returns `CodecError::UnknownFormatTag` if `tag` is not recognised, or
/// `CodecError::DecodeError` if `data` is invalid for the tag.
pub fn decode(data: &[u8], tag: &str) -> Result<Value, CodecError> {
    let format: FormatTag = tag.parse()?;
    decode_tagged(data, format)
}

fn decode_tagged(data: &[u8], format: FormatTag) -> Result<Value, CodecError> {
    match format {
        FormatTag::Raw => Ok(Value::Bytes(data.to_vec())),
        FormatTag::Utf8 => String::from_utf8(data.to_vec())
            .map(Value::Text)
            .map_err(|e| CodecError::DecodeError(e.to_string())),
        FormatTag::Numeric { kind, order } => {
            let bytes: [u8; 4] = data.try_into().map_err(|_| {
                CodecError::DecodeError(format!(
                    "format {} expects {} bytes, got {}",
                    format,
                    kind.width(),
                    data.len()
                ))
            })?;
            Ok(match (kind, order) {
                (NumericKind::Float32, ByteOrder::Little) => {
                    Value::Float(f32::from_le_bytes(bytes))
                }
                (NumericKind::Float32, ByteOrder::Big) => Value::Float(f32::from_be_bytes(bytes)),
                (NumericKind::Int32, ByteOrder::Little) => Value::Int(i32::from_le_bytes(bytes)),
                (NumericKind::Int32, ByteOrder::Big) => Value::Int(i32::from_be_bytes(bytes)),
            })
        }
    }
}
