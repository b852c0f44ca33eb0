//! Wire envelope for presence traffic.
//!
//! Every transport payload carries exactly one JSON object:
//!
//! - Heartbeat: `{"type":"heartbeat","name":"alice","joinedAt":1700000000000}`
//! - Chat message: `{"type":"message","name":"alice","payload":"hi"}`
//!
//! A payload that parses as a record but names some other `type` is not a
//! decode error. It decodes to [`Envelope::Unrecognized`] and the dispatcher
//! decides what to do with it.

use crate::member_name::{MemberName, MemberNameError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum size of an encoded envelope in bytes.
pub const MAX_ENVELOPE_SIZE: usize = 64 * 1024;

const KIND_HEARTBEAT: &str = "heartbeat";
const KIND_MESSAGE: &str = "message";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Empty payload")]
    Empty,

    #[error("Payload is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },

    #[error("Payload is not a JSON record")]
    NotARecord,

    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{kind} envelope is missing field `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("Invalid sender name: {0}")]
    InvalidName(#[from] MemberNameError),
}

/// One unit of data exchanged over a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Periodic liveness announcement.
    Heartbeat {
        name: MemberName,
        /// When the sender joined the channel, in milliseconds since Unix epoch.
        joined_at: u64,
    },
    /// Free-text chat message.
    Message { name: MemberName, payload: String },
    /// A well-formed record with a `type` we don't understand.
    Unrecognized { kind: String, name: Option<String> },
}

/// Flat field-keyed record as it appears on the wire.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    joined_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
}

impl Envelope {
    pub fn heartbeat(name: MemberName, joined_at: u64) -> Self {
        Self::Heartbeat { name, joined_at }
    }

    pub fn message(name: MemberName, payload: impl Into<String>) -> Self {
        Self::Message {
            name,
            payload: payload.into(),
        }
    }

    /// The wire `type` of this envelope.
    pub fn kind(&self) -> &str {
        match self {
            Self::Heartbeat { .. } => KIND_HEARTBEAT,
            Self::Message { .. } => KIND_MESSAGE,
            Self::Unrecognized { kind, .. } => kind.as_str(),
        }
    }

    /// Sender name as it appeared on the wire, if any.
    pub fn sender(&self) -> Option<&str> {
        match self {
            Self::Heartbeat { name, .. } | Self::Message { name, .. } => Some(name.as_str()),
            Self::Unrecognized { name, .. } => name.as_deref(),
        }
    }

    /// Serialize to JSON bytes.
    pub fn encode(&self) -> Vec<u8> {
        let wire = match self {
            Self::Heartbeat { name, joined_at } => WireEnvelope {
                kind: KIND_HEARTBEAT.to_string(),
                name: Some(name.to_string()),
                joined_at: Some(*joined_at),
                payload: None,
            },
            Self::Message { name, payload } => WireEnvelope {
                kind: KIND_MESSAGE.to_string(),
                name: Some(name.to_string()),
                joined_at: None,
                payload: Some(payload.clone()),
            },
            Self::Unrecognized { kind, name } => WireEnvelope {
                kind: kind.clone(),
                name: name.clone(),
                joined_at: None,
                payload: None,
            },
        };
        serde_json::to_vec(&wire).expect("Envelope serialization should not fail")
    }

    /// Parse from JSON bytes.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }
        if data.len() > MAX_ENVELOPE_SIZE {
            return Err(DecodeError::TooLarge {
                size: data.len(),
                max: MAX_ENVELOPE_SIZE,
            });
        }
        // Anything that doesn't open with a brace is rejected before touching serde.
        if data.trim_ascii_start().first() != Some(&b'{') {
            return Err(DecodeError::NotARecord);
        }

        let wire: WireEnvelope = serde_json::from_slice(data)?;
        match wire.kind.as_str() {
            KIND_HEARTBEAT => {
                let name = required(wire.name, KIND_HEARTBEAT, "name")?;
                let joined_at = required(wire.joined_at, KIND_HEARTBEAT, "joinedAt")?;
                Ok(Self::Heartbeat {
                    name: MemberName::from_wire(name)?,
                    joined_at,
                })
            }
            KIND_MESSAGE => {
                let name = required(wire.name, KIND_MESSAGE, "name")?;
                let payload = required(wire.payload, KIND_MESSAGE, "payload")?;
                Ok(Self::Message {
                    name: MemberName::from_wire(name)?,
                    payload,
                })
            }
            _ => Ok(Self::Unrecognized {
                kind: wire.kind,
                name: wire.name,
            }),
        }
    }
}

fn required<T>(value: Option<T>, kind: &'static str, field: &'static str) -> Result<T, DecodeError> {
    value.ok_or(DecodeError::MissingField { kind, field })
}
