//! Inbound payload dispatch.
//!
//! The transport invokes the dispatcher once per payload. It never fails:
//! anything it cannot route becomes a [`PresenceEvent::Error`] so one
//! misbehaving peer cannot disrupt the channel for everyone else.

use crate::envelope::Envelope;
use crate::events::PresenceEvent;
use crate::presence::{Observation, PresenceTable};
use tracing::{debug, trace, warn};

/// Decode `data` and apply it to `table`.
///
/// `local_joined_at` is when this session joined. A new member is announced
/// only if its own announced join time is strictly later; members that were
/// already present when we arrived are added silently.
pub fn dispatch(
    table: &mut PresenceTable,
    local_joined_at: u64,
    data: &[u8],
    now_ms: u64,
) -> Option<PresenceEvent> {
    let envelope = match Envelope::decode(data) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Dropping undecodable payload ({} bytes): {}", data.len(), e);
            return Some(PresenceEvent::error(format!("decode error: {}", e)));
        }
    };

    trace!(
        "Dispatching {} from {}",
        envelope.kind(),
        envelope.sender().unwrap_or("<unnamed>")
    );

    match envelope {
        Envelope::Heartbeat { name, joined_at } => {
            match table.observe(&name, joined_at, now_ms) {
                Observation::New if local_joined_at < joined_at => {
                    debug!("Member {} joined (joined_at={})", name, joined_at);
                    Some(PresenceEvent::Joined { name })
                }
                Observation::New => {
                    debug!("Member {} already present (joined_at={})", name, joined_at);
                    None
                }
                Observation::Refreshed => {
                    trace!("Heartbeat from {}", name);
                    None
                }
                Observation::Ignored => {
                    trace!("Ignoring our own heartbeat");
                    None
                }
            }
        }
        // Names are not unique, so a message carrying our own name may come
        // from a different peer. Always delivered.
        Envelope::Message { name, payload } => Some(PresenceEvent::Message { name, payload }),
        Envelope::Unrecognized { kind, name } => {
            warn!(
                "Unrecognized envelope type {:?} from {}",
                kind,
                name.as_deref().unwrap_or("<unnamed>")
            );
            Some(PresenceEvent::error(format!(
                "unrecognized envelope type: {}",
                kind
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member_name::MemberName;

    const JOINED_AT: u64 = 1000;

    fn name(s: &str) -> MemberName {
        s.parse().unwrap()
    }

    fn table() -> PresenceTable {
        PresenceTable::new(name("me"))
    }

    fn heartbeat(from: &str, joined_at: u64) -> Vec<u8> {
        Envelope::heartbeat(name(from), joined_at).encode()
    }

    // ==================== Heartbeats ====================

    #[test]
    fn test_later_joiner_is_announced_once() {
        let mut t = table();

        let event = dispatch(&mut t, JOINED_AT, &heartbeat("bob", 2000), 2000);
        assert_eq!(event, Some(PresenceEvent::Joined { name: name("bob") }));

        // Second heartbeat from a known member is silent
        let event = dispatch(&mut t, JOINED_AT, &heartbeat("bob", 2000), 5000);
        assert_eq!(event, None);
        assert_eq!(t.get("bob").unwrap().last_heartbeat_at, 5000);
    }

    #[test]
    fn test_earlier_member_is_added_silently() {
        let mut t = table();

        let event = dispatch(&mut t, JOINED_AT, &heartbeat("alice", 0), 1500);
        assert_eq!(event, None);
        assert!(t.contains("alice"));
    }

    #[test]
    fn test_equal_join_time_is_not_announced() {
        let mut t = table();
        let event = dispatch(&mut t, JOINED_AT, &heartbeat("twin", JOINED_AT), 1000);
        assert_eq!(event, None);
        assert!(t.contains("twin"));
    }

    #[test]
    fn test_rejoin_after_eviction_is_announced_again() {
        let mut t = table();
        dispatch(&mut t, JOINED_AT, &heartbeat("bob", 2000), 2000);
        assert_eq!(t.sweep(11_000, 9000), vec![name("bob")]);

        let event = dispatch(&mut t, JOINED_AT, &heartbeat("bob", 20_000), 20_000);
        assert_eq!(event, Some(PresenceEvent::Joined { name: name("bob") }));
    }

    #[test]
    fn test_own_heartbeat_ignored() {
        let mut t = table();
        let event = dispatch(&mut t, JOINED_AT, &heartbeat("me", 5000), 5000);
        assert_eq!(event, None);
        assert!(t.is_empty());
    }

    // ==================== Messages ====================

    #[test]
    fn test_message_from_unknown_sender_delivered() {
        let mut t = table();
        let data = Envelope::message(name("stranger"), "hello").encode();

        let event = dispatch(&mut t, JOINED_AT, &data, 1200);
        assert_eq!(
            event,
            Some(PresenceEvent::Message {
                name: name("stranger"),
                payload: "hello".into(),
            })
        );
        // Messages never touch the table
        assert!(t.is_empty());
    }

    #[test]
    fn test_message_with_own_name_delivered() {
        // Another peer that picked the same name
        let mut t = table();
        let data = Envelope::message(name("me"), "hi from the other me").encode();
        assert_eq!(
            dispatch(&mut t, JOINED_AT, &data, 1200),
            Some(PresenceEvent::Message {
                name: name("me"),
                payload: "hi from the other me".into(),
            })
        );
        assert!(t.is_empty());
    }

    #[test]
    fn test_long_sender_name_is_tracked() {
        let mut t = table();
        let long = "x".repeat(65);
        let data = format!(r#"{{"type":"heartbeat","name":"{}","joinedAt":2000}}"#, long);

        let event = dispatch(&mut t, JOINED_AT, data.as_bytes(), 2000);
        assert!(matches!(event, Some(PresenceEvent::Joined { .. })));
        assert!(t.contains(long.as_str()));
    }

    // ==================== Errors ====================

    #[test]
    fn test_malformed_payload_reports_error_and_leaves_table() {
        let mut t = table();
        dispatch(&mut t, JOINED_AT, &heartbeat("alice", 0), 1000);

        let event = dispatch(&mut t, JOINED_AT, b"{not json", 1100);
        assert!(matches!(event, Some(PresenceEvent::Error { .. })));
        assert_eq!(t.len(), 1);
        assert_eq!(t.get("alice").unwrap().last_heartbeat_at, 1000);
    }

    #[test]
    fn test_unrecognized_kind_reports_kind() {
        let mut t = table();
        let event = dispatch(&mut t, JOINED_AT, br#"{"type":"typing","name":"bob"}"#, 1100);

        match event {
            Some(PresenceEvent::Error { description }) => {
                assert!(description.contains("typing"));
            }
            other => panic!("expected error event, got {:?}", other),
        }
        assert!(t.is_empty());
    }
}
