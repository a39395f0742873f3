//! Values stored in queues and the encodings they are checked against.

use crate::Error;
use bytes::Bytes;

/// The encoding every value of an [crate::Engine] must conform to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    /// Arbitrary bytes.
    #[default]
    Binary,
    /// UTF-8 text.
    String,
    /// A JSON object or array.
    Json,
}

/// A value enqueued into (or read from) a queue.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Binary(Bytes),
    String(String),
    Json(serde_json::Value),
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Self::Binary(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl Encoding {
    /// Ensure `value` conforms to this encoding.
    pub fn validate(&self, value: &Value) -> Result<(), Error> {
        let valid = match (self, value) {
            (Self::Binary, Value::Binary(_)) => true,
            (Self::String, Value::String(_)) => true,
            (Self::Json, Value::Json(json)) => json.is_object() || json.is_array(),
            _ => false,
        };
        if !valid {
            return Err(Error::InvalidValue(*self));
        }
        Ok(())
    }

    /// Validate `value` and serialize it for storage.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, Error> {
        self.validate(value)?;
        match value {
            Value::Binary(bytes) => Ok(bytes.to_vec()),
            Value::String(string) => Ok(string.as_bytes().to_vec()),
            Value::Json(json) => serde_json::to_vec(json).map_err(|_| Error::InvalidValue(*self)),
        }
    }

    /// Deserialize a stored value.
    pub fn decode(&self, raw: Vec<u8>) -> Result<Value, Error> {
        match self {
            Self::Binary => Ok(Value::Binary(raw.into())),
            Self::String => String::from_utf8(raw)
                .map(Value::String)
                .map_err(|err| Error::CorruptValue(err.to_string())),
            Self::Json => serde_json::from_slice(&raw)
                .map(Value::Json)
                .map_err(|err| Error::CorruptValue(err.to_string())),
        }
    }
}
