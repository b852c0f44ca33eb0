//! Presence table and liveness sweeping.
//!
//! The table maps each known member to the time we last heard its
//! heartbeat. It is only ever refreshed by inbound heartbeats and only ever
//! shrunk by [`PresenceTable::sweep`]. Staleness is enforced by the periodic
//! sweep, not on read.

use crate::member_name::MemberName;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("cleanup_timeout ({timeout:?}) must exceed heartbeat_interval ({heartbeat:?})")]
    TimeoutTooShort {
        timeout: Duration,
        heartbeat: Duration,
    },
}

/// Timing configuration for heartbeats and liveness sweeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceConfig {
    /// How often we announce our own liveness (default: 3s)
    pub heartbeat_interval: Duration,
    /// How often the presence table is swept (default: 200ms)
    pub cleanup_poll_interval: Duration,
    /// Silence after which a member is declared gone (default: 9s)
    pub cleanup_timeout: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self::with_heartbeat_interval(Duration::from_secs(3))
    }
}

impl PresenceConfig {
    /// Derive a config from a heartbeat period.
    ///
    /// The timeout is three heartbeat periods, so two consecutive missed
    /// heartbeats are tolerated before a member is evicted.
    pub fn with_heartbeat_interval(heartbeat_interval: Duration) -> Self {
        Self {
            heartbeat_interval,
            cleanup_poll_interval: Duration::from_millis(200),
            cleanup_timeout: heartbeat_interval * 3,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Zero("heartbeat_interval"));
        }
        if self.cleanup_poll_interval.is_zero() {
            return Err(ConfigError::Zero("cleanup_poll_interval"));
        }
        if self.cleanup_timeout <= self.heartbeat_interval {
            return Err(ConfigError::TimeoutTooShort {
                timeout: self.cleanup_timeout,
                heartbeat: self.heartbeat_interval,
            });
        }
        Ok(())
    }

    pub fn cleanup_timeout_ms(&self) -> u64 {
        self.cleanup_timeout.as_millis() as u64
    }
}

/// A remote peer as seen by this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: MemberName,
    /// Join time the member announced in its most recent heartbeat
    pub joined_at: u64,
    /// When we last received a heartbeat from this member (our clock)
    pub last_heartbeat_at: u64,
}

/// Result of recording a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First heartbeat from this name
    New,
    /// Name was already present, timestamp refreshed
    Refreshed,
    /// Heartbeat carried our own name and was dropped
    Ignored,
}

/// Known members of a channel, keyed by name.
///
/// Never contains an entry for the local name.
#[derive(Debug)]
pub struct PresenceTable {
    local_name: MemberName,
    members: HashMap<MemberName, Member>,
}

impl PresenceTable {
    pub fn new(local_name: MemberName) -> Self {
        Self {
            local_name,
            members: HashMap::new(),
        }
    }

    pub fn local_name(&self) -> &MemberName {
        &self.local_name
    }

    /// Record a heartbeat from `name` received at `now_ms`.
    pub fn observe(&mut self, name: &MemberName, joined_at: u64, now_ms: u64) -> Observation {
        if *name == self.local_name {
            return Observation::Ignored;
        }

        if let Some(existing) = self.members.get_mut(name) {
            existing.joined_at = joined_at;
            existing.last_heartbeat_at = now_ms;
            return Observation::Refreshed;
        }

        self.members.insert(
            name.clone(),
            Member {
                name: name.clone(),
                joined_at,
                last_heartbeat_at: now_ms,
            },
        );
        Observation::New
    }

    /// Evict every member silent for at least `timeout_ms`.
    ///
    /// Returns evicted names in sorted order.
    pub fn sweep(&mut self, now_ms: u64, timeout_ms: u64) -> Vec<MemberName> {
        let mut stale: Vec<MemberName> = self
            .members
            .values()
            .filter(|m| now_ms.saturating_sub(m.last_heartbeat_at) >= timeout_ms)
            .map(|m| m.name.clone())
            .collect();
        stale.sort();

        for name in &stale {
            self.members.remove(name);
        }
        stale
    }

    pub fn get(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    /// Snapshot of all members sorted by name.
    pub fn snapshot(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self.members.values().cloned().collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));
        members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }
}
