//! Session state machine for one channel.
//!
//! `Membership` is the runtime-independent half of a session: it owns the
//! presence table and the `Idle -> Joined -> Disconnected` lifecycle, and
//! turns inbound payloads and sweep ticks into events. It performs no I/O
//! and starts no timers; a driver feeds it time and forwards what it
//! produces.

use crate::dispatch::dispatch;
use crate::envelope::{Envelope, MAX_ENVELOPE_SIZE};
use crate::events::PresenceEvent;
use crate::member_name::MemberName;
use crate::presence::{Member, PresenceConfig, PresenceTable};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, not yet subscribed
    Idle,
    /// Subscribed, heartbeating and sweeping
    Joined,
    /// Torn down (terminal)
    Disconnected,
}

/// Misuse of the session API. Never has a protocol side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("Already joined channel {0:?}")]
    AlreadyJoined(String),

    #[error("Not joined to a channel")]
    NotJoined,

    #[error("Session has been disconnected")]
    Disconnected,

    #[error("Channel name must not be empty")]
    InvalidChannel,

    #[error("Message envelope is {size} bytes, limit is {max}")]
    PayloadTooLarge { size: usize, max: usize },
}

/// One peer's participation in exactly one channel.
#[derive(Debug)]
pub struct Membership {
    config: PresenceConfig,
    state: SessionState,
    channel: Option<String>,
    joined_at: Option<u64>,
    table: PresenceTable,
}

impl Membership {
    pub fn new(own_name: MemberName, config: PresenceConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            channel: None,
            joined_at: None,
            table: PresenceTable::new(own_name),
        }
    }

    pub fn own_name(&self) -> &MemberName {
        self.table.local_name()
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_joined(&self) -> bool {
        self.state == SessionState::Joined
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn joined_at(&self) -> Option<u64> {
        self.joined_at
    }

    pub fn table(&self) -> &PresenceTable {
        &self.table
    }

    /// Snapshot of known members sorted by name.
    pub fn members(&self) -> Vec<Member> {
        self.table.snapshot()
    }

    /// Transition `Idle -> Joined`, recording a provisional join time.
    ///
    /// The driver restamps it with [`Membership::subscribed`] once the
    /// subscription is up. Fails without touching any state if the session
    /// has ever joined.
    pub fn join(&mut self, channel: &str, now_ms: u64) -> Result<(), UsageError> {
        if self.state != SessionState::Idle {
            return Err(UsageError::AlreadyJoined(
                self.channel.clone().unwrap_or_default(),
            ));
        }
        if channel.is_empty() {
            return Err(UsageError::InvalidChannel);
        }

        self.channel = Some(channel.to_string());
        self.joined_at = Some(now_ms);
        self.state = SessionState::Joined;
        info!("{} joined channel {} at {}", self.own_name(), channel, now_ms);
        Ok(())
    }

    /// Record `now_ms` as the join time. Called when the subscription is
    /// established; does nothing unless joined.
    pub fn subscribed(&mut self, now_ms: u64) {
        if self.state == SessionState::Joined {
            trace!("Subscription to {:?} established at {}", self.channel, now_ms);
            self.joined_at = Some(now_ms);
        }
    }

    /// Undo a `join` whose subscription could not be established.
    ///
    /// Only meaningful straight after `join`; does nothing once disconnected.
    pub fn abort_join(&mut self) {
        if self.state == SessionState::Joined {
            debug!("Reverting join of {:?}", self.channel);
            self.state = SessionState::Idle;
            self.channel = None;
            self.joined_at = None;
            self.table.clear();
        }
    }

    /// Our own liveness announcement.
    pub fn heartbeat(&self) -> Result<Envelope, UsageError> {
        let joined_at = self.require_joined()?;
        Ok(Envelope::heartbeat(self.own_name().clone(), joined_at))
    }

    /// Build an encoded chat message from us.
    pub fn message(&self, payload: impl Into<String>) -> Result<Vec<u8>, UsageError> {
        self.require_joined()?;
        let data = Envelope::message(self.own_name().clone(), payload).encode();
        if data.len() > MAX_ENVELOPE_SIZE {
            return Err(UsageError::PayloadTooLarge {
                size: data.len(),
                max: MAX_ENVELOPE_SIZE,
            });
        }
        Ok(data)
    }

    /// Handle one inbound payload. Ignored unless joined.
    pub fn receive(&mut self, data: &[u8], now_ms: u64) -> Option<PresenceEvent> {
        let joined_at = match (self.state, self.joined_at) {
            (SessionState::Joined, Some(joined_at)) => joined_at,
            _ => {
                debug!("Dropping {} byte payload while {:?}", data.len(), self.state);
                return None;
            }
        };
        dispatch(&mut self.table, joined_at, data, now_ms)
    }

    /// Evict stale members. Returns one `Left` event per eviction.
    pub fn sweep(&mut self, now_ms: u64) -> Vec<PresenceEvent> {
        if !self.is_joined() {
            return Vec::new();
        }
        self.table
            .sweep(now_ms, self.config.cleanup_timeout_ms())
            .into_iter()
            .map(|name| {
                info!("Member {} left (no heartbeat for {:?})", name, self.config.cleanup_timeout);
                PresenceEvent::Left { name }
            })
            .collect()
    }

    /// Enter the terminal state. Returns true on the first call only.
    pub fn disconnect(&mut self) -> bool {
        if self.state == SessionState::Disconnected {
            return false;
        }
        info!("{} disconnected", self.own_name());
        self.state = SessionState::Disconnected;
        true
    }

    fn require_joined(&self) -> Result<u64, UsageError> {
        match (self.state, self.joined_at) {
            (SessionState::Joined, Some(joined_at)) => Ok(joined_at),
            (SessionState::Disconnected, _) => Err(UsageError::Disconnected),
            _ => Err(UsageError::NotJoined),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> MemberName {
        s.parse().unwrap()
    }

    fn membership() -> Membership {
        Membership::new(name("me"), PresenceConfig::default())
    }

    fn heartbeat(from: &str, joined_at: u64) -> Vec<u8> {
        Envelope::heartbeat(name(from), joined_at).encode()
    }

    // ==================== Lifecycle ====================

    #[test]
    fn test_initial_state() {
        let m = membership();
        assert_eq!(m.state(), SessionState::Idle);
        assert_eq!(m.channel(), None);
        assert_eq!(m.joined_at(), None);
        assert!(m.members().is_empty());
    }

    #[test]
    fn test_join_records_channel_and_time() {
        let mut m = membership();
        m.join("lobby", 1000).unwrap();

        assert_eq!(m.state(), SessionState::Joined);
        assert_eq!(m.channel(), Some("lobby"));
        assert_eq!(m.joined_at(), Some(1000));
    }

    #[test]
    fn test_subscribed_restamps_join_time() {
        let mut m = membership();
        m.join("lobby", 1000).unwrap();
        m.subscribed(1250);

        assert_eq!(m.joined_at(), Some(1250));
        assert_eq!(m.heartbeat(), Ok(Envelope::heartbeat(name("me"), 1250)));
    }

    #[test]
    fn test_subscribed_ignored_unless_joined() {
        let mut m = membership();
        m.subscribed(1250);
        assert_eq!(m.joined_at(), None);

        m.join("lobby", 1000).unwrap();
        m.disconnect();
        m.subscribed(2000);
        assert_eq!(m.joined_at(), Some(1000));
    }

    #[test]
    fn test_join_twice_fails_without_side_effect() {
        let mut m = membership();
        m.join("lobby", 1000).unwrap();

        let err = m.join("other", 5000).unwrap_err();
        assert_eq!(err, UsageError::AlreadyJoined("lobby".into()));
        assert_eq!(m.channel(), Some("lobby"));
        assert_eq!(m.joined_at(), Some(1000));
    }

    #[test]
    fn test_join_after_disconnect_fails() {
        let mut m = membership();
        m.join("lobby", 1000).unwrap();
        m.disconnect();

        assert!(matches!(m.join("lobby", 2000), Err(UsageError::AlreadyJoined(_))));
        assert_eq!(m.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_join_empty_channel_rejected() {
        let mut m = membership();
        assert_eq!(m.join("", 1000), Err(UsageError::InvalidChannel));
        assert_eq!(m.state(), SessionState::Idle);
    }

    #[test]
    fn test_abort_join_returns_to_idle() {
        let mut m = membership();
        m.join("lobby", 1000).unwrap();
        m.receive(&heartbeat("alice", 0), 1100);
        m.abort_join();

        assert_eq!(m.state(), SessionState::Idle);
        assert_eq!(m.joined_at(), None);
        assert!(m.members().is_empty());
        // And joining is possible again
        m.join("lobby", 2000).unwrap();
    }

    #[test]
    fn test_disconnect_idempotent() {
        let mut m = membership();
        assert!(m.disconnect());
        assert!(!m.disconnect());
        assert_eq!(m.state(), SessionState::Disconnected);
    }

    // ==================== Outbound ====================

    #[test]
    fn test_heartbeat_requires_join() {
        let mut m = membership();
        assert_eq!(m.heartbeat(), Err(UsageError::NotJoined));

        m.join("lobby", 1000).unwrap();
        assert_eq!(m.heartbeat(), Ok(Envelope::heartbeat(name("me"), 1000)));

        m.disconnect();
        assert_eq!(m.heartbeat(), Err(UsageError::Disconnected));
    }

    #[test]
    fn test_message_before_join_fails() {
        let m = membership();
        assert_eq!(m.message("hi"), Err(UsageError::NotJoined));
    }

    #[test]
    fn test_message_encodes_own_name() {
        let mut m = membership();
        m.join("lobby", 1000).unwrap();

        let data = m.message("hi").unwrap();
        assert_eq!(
            Envelope::decode(&data).unwrap(),
            Envelope::message(name("me"), "hi")
        );
    }

    #[test]
    fn test_message_too_large() {
        let mut m = membership();
        m.join("lobby", 1000).unwrap();

        let payload = "x".repeat(MAX_ENVELOPE_SIZE);
        assert!(matches!(
            m.message(payload),
            Err(UsageError::PayloadTooLarge { .. })
        ));
    }

    // ==================== Inbound ====================

    #[test]
    fn test_receive_ignored_before_join() {
        let mut m = membership();
        assert_eq!(m.receive(&heartbeat("alice", 5000), 5000), None);
        assert!(m.members().is_empty());
    }

    #[test]
    fn test_receive_ignored_after_disconnect() {
        let mut m = membership();
        m.join("lobby", 1000).unwrap();
        m.disconnect();

        assert_eq!(m.receive(&heartbeat("bob", 5000), 5000), None);
        assert_eq!(m.receive(b"garbage", 5000), None);
        assert!(m.members().is_empty());
    }

    #[test]
    fn test_two_peer_join_scenario() {
        // A joins at t=0, B joins at t=1000
        let mut a = Membership::new(name("A"), PresenceConfig::default());
        let mut b = Membership::new(name("B"), PresenceConfig::default());
        a.join("lobby", 0).unwrap();
        b.join("lobby", 1000).unwrap();

        // B hears A (joined before B): silent, but tracked
        let a_hb = a.heartbeat().unwrap().encode();
        assert_eq!(b.receive(&a_hb, 3000), None);
        assert!(b.table().contains("A"));

        // A hears B (joined after A): announced
        let b_hb = b.heartbeat().unwrap().encode();
        assert_eq!(
            a.receive(&b_hb, 1000),
            Some(PresenceEvent::Joined { name: name("B") })
        );
    }

    // ==================== Sweep ====================

    #[test]
    fn test_sweep_emits_left_once() {
        let mut m = membership();
        m.join("lobby", 1000).unwrap();
        m.receive(&heartbeat("bob", 2000), 2000);

        assert!(m.sweep(10_999).is_empty());
        assert_eq!(
            m.sweep(11_000),
            vec![PresenceEvent::Left { name: name("bob") }]
        );
        assert!(m.sweep(11_200).is_empty());
    }

    #[test]
    fn test_sweep_noop_after_disconnect() {
        let mut m = membership();
        m.join("lobby", 1000).unwrap();
        m.receive(&heartbeat("bob", 2000), 2000);
        m.disconnect();

        assert!(m.sweep(60_000).is_empty());
    }
}
