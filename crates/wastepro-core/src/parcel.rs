//! Parcel — the envelope carried across the bus.
//!
//! Two shapes travel on the wire: *text* parcels whose content is a JSON
//! value, and *binary* parcels whose content is an opaque payload plus a
//! JSON sidecar. Text parcels encode as plain JSON; binary parcels are
//! framed (magic byte, header length, JSON header, raw payload) so document
//! bytes cross the broker without base64 inflation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};

/// Wire format revision.
pub const PARCEL_VERSION: u8 = 3;

const BINARY_MAGIC: u8 = 0xB7;

/// Structured error descriptor attached to a reply parcel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParcelError {
    pub kind: String,
    pub message: String,
}

impl ParcelError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// The payload of a parcel.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// A JSON value (mapping or string, typically).
    Text(Value),
    /// Opaque bytes plus a JSON sidecar.
    Binary {
        payload: Vec<u8>,
        sidecar: Map<String, Value>,
    },
}

/// The expected content kind of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Binary,
    Any,
}

impl ContentKind {
    pub fn matches(&self, body: &Body) -> bool {
        match (self, body) {
            (ContentKind::Any, _) => true,
            (ContentKind::Text, Body::Text(_)) => true,
            (ContentKind::Binary, Body::Binary { .. }) => true,
            _ => false,
        }
    }
}

/// The unit of bus traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct Parcel {
    pub version: u8,
    pub body: Body,
    /// Reply topic for synchronous request/reply. A parcel used for
    /// request/reply always carries a non-empty `topic_return`.
    pub topic_return: Option<String>,
    /// Identity of the publishing agent.
    pub agent_id: Option<String>,
    pub error: Option<ParcelError>,
}

#[derive(Serialize, Deserialize)]
struct TextEnvelope {
    version: u8,
    content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    topic_return: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ParcelError>,
}

#[derive(Serialize, Deserialize)]
struct BinaryHeader {
    version: u8,
    sidecar: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    topic_return: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ParcelError>,
}

impl Parcel {
    /// A text parcel wrapping a JSON value.
    pub fn text(content: Value) -> Self {
        Self {
            version: PARCEL_VERSION,
            body: Body::Text(content),
            topic_return: None,
            agent_id: None,
            error: None,
        }
    }

    /// A binary parcel wrapping raw bytes plus a sidecar mapping.
    pub fn binary(payload: Vec<u8>, sidecar: Map<String, Value>) -> Self {
        Self {
            version: PARCEL_VERSION,
            body: Body::Binary { payload, sidecar },
            topic_return: None,
            agent_id: None,
            error: None,
        }
    }

    /// A text parcel carrying only an error descriptor.
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        let mut parcel = Self::text(Value::Null);
        parcel.error = Some(ParcelError::new(kind, message));
        parcel
    }

    pub fn with_return(mut self, topic: impl Into<String>) -> Self {
        self.topic_return = Some(topic.into());
        self
    }

    pub fn is_binary(&self) -> bool {
        matches!(self.body, Body::Binary { .. })
    }

    /// The JSON content of a text parcel, `Null` for binary parcels.
    pub fn content(&self) -> &Value {
        match &self.body {
            Body::Text(value) => value,
            Body::Binary { .. } => &Value::Null,
        }
    }

    /// The raw payload of a binary parcel.
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Binary { payload, .. } => Some(payload),
            Body::Text(_) => None,
        }
    }

    /// Look up a key in the content mapping (text) or sidecar (binary).
    pub fn get(&self, key: &str) -> Option<&Value> {
        match &self.body {
            Body::Text(Value::Object(map)) => map.get(key),
            Body::Binary { sidecar, .. } => sidecar.get(key),
            _ => None,
        }
    }

    /// Insert a key into the content mapping (text) or sidecar (binary).
    /// Non-object text content is replaced by a singleton mapping.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        match &mut self.body {
            Body::Text(Value::Object(map)) => {
                map.insert(key.into(), value);
            }
            Body::Text(other) => {
                let mut map = Map::new();
                map.insert(key.into(), value);
                *other = Value::Object(map);
            }
            Body::Binary { sidecar, .. } => {
                sidecar.insert(key.into(), value);
            }
        }
    }

    /// Convert into a `Result`, surfacing an attached error descriptor.
    pub fn into_result(self) -> Result<Parcel> {
        match &self.error {
            Some(err) => Err(Error::Remote {
                kind: err.kind.clone(),
                message: err.message.clone(),
            }),
            None => Ok(self),
        }
    }

    /// Encode for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match &self.body {
            Body::Text(content) => {
                let envelope = TextEnvelope {
                    version: self.version,
                    content: content.clone(),
                    topic_return: self.topic_return.clone(),
                    agent_id: self.agent_id.clone(),
                    error: self.error.clone(),
                };
                Ok(serde_json::to_vec(&envelope)?)
            }
            Body::Binary { payload, sidecar } => {
                let header = BinaryHeader {
                    version: self.version,
                    sidecar: sidecar.clone(),
                    topic_return: self.topic_return.clone(),
                    agent_id: self.agent_id.clone(),
                    error: self.error.clone(),
                };
                let header_bytes = serde_json::to_vec(&header)?;
                let mut out = Vec::with_capacity(5 + header_bytes.len() + payload.len());
                out.push(BINARY_MAGIC);
                out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(&header_bytes);
                out.extend_from_slice(payload);
                Ok(out)
            }
        }
    }

    /// Decode from the wire, sniffing the frame shape.
    pub fn from_bytes(bytes: &[u8]) -> Result<Parcel> {
        if bytes.first() == Some(&BINARY_MAGIC) {
            if bytes.len() < 5 {
                return Err(Error::Codec("binary frame truncated".into()));
            }
            let header_len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
            let body_start = 5 + header_len;
            if bytes.len() < body_start {
                return Err(Error::Codec("binary header truncated".into()));
            }
            let header: BinaryHeader = serde_json::from_slice(&bytes[5..body_start])?;
            Ok(Parcel {
                version: header.version,
                body: Body::Binary {
                    payload: bytes[body_start..].to_vec(),
                    sidecar: header.sidecar,
                },
                topic_return: header.topic_return,
                agent_id: header.agent_id,
                error: header.error,
            })
        } else {
            let envelope: TextEnvelope = serde_json::from_slice(bytes)
                .map_err(|e| Error::Codec(format!("invalid text parcel: {e}")))?;
            Ok(Parcel {
                version: envelope.version,
                body: Body::Text(envelope.content),
                topic_return: envelope.topic_return,
                agent_id: envelope.agent_id,
                error: envelope.error,
            })
        }
    }
}

impl From<Value> for Parcel {
    fn from(value: Value) -> Self {
        Parcel::text(value)
    }
}

impl From<Map<String, Value>> for Parcel {
    fn from(map: Map<String, Value>) -> Self {
        Parcel::text(Value::Object(map))
    }
}

impl From<&str> for Parcel {
    fn from(text: &str) -> Self {
        Parcel::text(json!(text))
    }
}
