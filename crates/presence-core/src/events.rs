//! Observable presence events.
//!
//! These are the only output of the protocol. A presentation layer renders
//! them; nothing in the protocol reacts to them.

use crate::member_name::MemberName;
use serde::Serialize;

/// Events emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PresenceEvent {
    /// A member that joined after us sent its first heartbeat.
    Joined { name: MemberName },
    /// A member stopped heartbeating and was evicted.
    Left { name: MemberName },
    /// Chat message from a member.
    Message { name: MemberName, payload: String },
    /// An inbound payload could not be decoded or classified.
    Error { description: String },
}

impl PresenceEvent {
    pub fn error(description: impl Into<String>) -> Self {
        Self::Error {
            description: description.into(),
        }
    }
}
