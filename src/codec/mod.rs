//! Generic CBOR Codec
//!
//! A small, self-contained CBOR (RFC 8949) engine used to serialize
//! persistent state. Values are represented as a [`Value`] tree; the
//! encoder always produces definite-length, shortest-form items while the
//! decoder also accepts indefinite-length strings, arrays and maps.
//!
//! ## Initial byte
//!
//! ```text
//! [major type:3][additional info:5]
//! ```
//!
//! | Major | Type             |
//! |-------|------------------|
//! | 0     | unsigned integer |
//! | 1     | negative integer |
//! | 2     | byte string      |
//! | 3     | text string      |
//! | 4     | array            |
//! | 5     | map              |
//! | 6     | tag              |
//! | 7     | simple / float   |

mod decode;
mod encode;
#[cfg(test)]
mod tests;

use thiserror::Error;

pub use decode::{decode, Decoder, MAX_NESTING_DEPTH};
pub use encode::{encode, encode_into};

/// Errors raised while decoding CBOR data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEnd { offset: usize },

    #[error("reserved additional information {info} at offset {offset}")]
    ReservedInfo { info: u8, offset: usize },

    #[error("invalid indefinite-length item at offset {offset}")]
    InvalidIndefinite { offset: usize },

    #[error("unexpected break at offset {offset}")]
    UnexpectedBreak { offset: usize },

    #[error("invalid UTF-8 in text string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("nesting deeper than {max} levels")]
    DepthExceeded { max: usize },

    #[error("{count} trailing bytes after value")]
    TrailingBytes { count: usize },
}

/// A CBOR data item.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Unsigned(u64),
    /// Negative integer stored as `-1 - n`.
    Negative(u64),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Tag(u64, Box<Value>),
    Bool(bool),
    Null,
    Undefined,
    Simple(u8),
    Float(f64),
}

impl Value {
    /// Builds an integer value from a signed number.
    pub fn integer(value: i64) -> Self {
        if value >= 0 {
            Value::Unsigned(value as u64)
        } else {
            Value::Negative((-1 - value) as u64)
        }
    }

    /// Text-keyed map from `(key, value)` pairs.
    pub fn text_map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Value::Text(k.into()), v))
                .collect(),
        )
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Unsigned(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Unsigned(n) => i64::try_from(*n).ok(),
            Value::Negative(n) => i64::try_from(*n).ok().map(|n| -1 - n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Looks up a text key in a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_text() == Some(key))
            .map(|(_, v)| v)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Unsigned(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Unsigned(u64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}
