//! Application payloads and their byte normalization.
//!
//! The message kind travels as an explicit tag next to the bytes, so decoding
//! never guesses: the text `"123"` and the number `123` stay distinct.

use std::{any, fmt};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::CipherError;

/// Wire tag identifying how a payload was normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Text = 1,
    Bytes = 2,
    Record = 3,
    Number = 4,
    Object = 5,
}

impl MessageKind {
    pub fn from_wire(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(MessageKind::Text),
            2 => Some(MessageKind::Bytes),
            3 => Some(MessageKind::Record),
            4 => Some(MessageKind::Number),
            5 => Some(MessageKind::Object),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Text => "text",
            MessageKind::Bytes => "bytes",
            MessageKind::Record => "record",
            MessageKind::Number => "number",
            MessageKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// Numeric scalar payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(value) => write!(f, "{value}"),
            // Debug keeps a trailing `.0` on integral floats so they do not
            // come back as integers.
            Scalar::Float(value) => write!(f, "{value:?}"),
        }
    }
}

/// A serialized Rust value tagged with its type name. The type name comes from
/// `std::any::type_name`, which is only stable within one build, so these
/// payloads are meant for reuse by the same program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueObject {
    type_name: String,
    data: Vec<u8>,
}

impl OpaqueObject {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

/// Payload accepted by the cipher.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Bytes(Vec<u8>),
    /// Structured record (map or sequence), serialized as canonical JSON.
    Record(serde_json::Value),
    Number(Scalar),
    Object(OpaqueObject),
}

impl Message {
    /// Wrap any serializable value that is not one of the other kinds.
    pub fn object<T: Serialize>(value: &T) -> Result<Self, CipherError> {
        let data = bincode::serialize(value).map_err(|e| CipherError::Encoding(e.to_string()))?;
        Ok(Message::Object(OpaqueObject {
            type_name: any::type_name::<T>().to_string(),
            data,
        }))
    }

    /// Recover a value wrapped with [`Message::object`].
    pub fn to_object<T: DeserializeOwned>(&self) -> Result<T, CipherError> {
        let Message::Object(object) = self else {
            return Err(CipherError::Encoding(format!(
                "expected object payload, found {}",
                self.kind()
            )));
        };
        let expected = any::type_name::<T>();
        if object.type_name != expected {
            return Err(CipherError::Encoding(format!(
                "object holds {}, not {expected}",
                object.type_name
            )));
        }
        bincode::deserialize(&object.data).map_err(|e| CipherError::Encoding(e.to_string()))
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Text(_) => MessageKind::Text,
            Message::Bytes(_) => MessageKind::Bytes,
            Message::Record(_) => MessageKind::Record,
            Message::Number(_) => MessageKind::Number,
            Message::Object(_) => MessageKind::Object,
        }
    }

    /// Normalize to bytes for encryption.
    pub fn encode(&self) -> Result<Vec<u8>, CipherError> {
        match self {
            Message::Text(text) => Ok(text.as_bytes().to_vec()),
            Message::Bytes(bytes) => Ok(bytes.clone()),
            Message::Record(value) => {
                ensure_container(value)?;
                serde_json::to_vec(value).map_err(|e| CipherError::Encoding(e.to_string()))
            }
            Message::Number(scalar) => Ok(scalar.to_string().into_bytes()),
            Message::Object(object) => {
                let name = object.type_name.as_bytes();
                let name_len = u16::try_from(name.len())
                    .map_err(|_| CipherError::Encoding("object type name too long".into()))?;
                let mut out = Vec::with_capacity(2 + name.len() + object.data.len());
                out.extend_from_slice(&name_len.to_be_bytes());
                out.extend_from_slice(name);
                out.extend_from_slice(&object.data);
                Ok(out)
            }
        }
    }

    /// Rebuild a message from decrypted bytes and its recorded kind.
    pub fn decode(kind: MessageKind, bytes: Vec<u8>) -> Result<Self, CipherError> {
        match kind {
            MessageKind::Text => String::from_utf8(bytes)
                .map(Message::Text)
                .map_err(|e| CipherError::Encoding(e.to_string())),
            MessageKind::Bytes => Ok(Message::Bytes(bytes)),
            MessageKind::Record => serde_json::from_slice::<serde_json::Value>(&bytes)
                .map_err(|e| CipherError::Encoding(e.to_string()))
                .and_then(Message::try_from),
            MessageKind::Number => {
                let text =
                    std::str::from_utf8(&bytes).map_err(|e| CipherError::Encoding(e.to_string()))?;
                if let Ok(value) = text.parse::<i64>() {
                    return Ok(Message::Number(Scalar::Int(value)));
                }
                text.parse::<f64>()
                    .map(|value| Message::Number(Scalar::Float(value)))
                    .map_err(|_| CipherError::Encoding(format!("not a number: {text:?}")))
            }
            MessageKind::Object => {
                if bytes.len() < 2 {
                    return Err(CipherError::Encoding("truncated object header".into()));
                }
                let name_len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
                let rest = &bytes[2..];
                if rest.len() < name_len {
                    return Err(CipherError::Encoding("truncated object type name".into()));
                }
                let (name, data) = rest.split_at(name_len);
                let type_name = String::from_utf8(name.to_vec())
                    .map_err(|e| CipherError::Encoding(e.to_string()))?;
                Ok(Message::Object(OpaqueObject {
                    type_name,
                    data: data.to_vec(),
                }))
            }
        }
    }
}

impl From<&str> for Message {
    fn from(value: &str) -> Self {
        Message::Text(value.to_string())
    }
}

impl From<String> for Message {
    fn from(value: String) -> Self {
        Message::Text(value)
    }
}

impl From<Vec<u8>> for Message {
    fn from(value: Vec<u8>) -> Self {
        Message::Bytes(value)
    }
}

impl From<&[u8]> for Message {
    fn from(value: &[u8]) -> Self {
        Message::Bytes(value.to_vec())
    }
}

/// Only maps and sequences are records; wrap scalars as text or numbers.
impl TryFrom<serde_json::Value> for Message {
    type Error = CipherError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        ensure_container(&value)?;
        Ok(Message::Record(value))
    }
}

fn ensure_container(value: &serde_json::Value) -> Result<(), CipherError> {
    if value.is_object() || value.is_array() {
        return Ok(());
    }
    Err(CipherError::Encoding(format!(
        "record must be a JSON object or array, got {value}"
    )))
}

impl From<i64> for Message {
    fn from(value: i64) -> Self {
        Message::Number(Scalar::Int(value))
    }
}

impl From<f64> for Message {
    fn from(value: f64) -> Self {
        Message::Number(Scalar::Float(value))
    }
}
