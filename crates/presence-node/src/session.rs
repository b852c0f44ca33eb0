//! Presence session driven by Tokio.
//!
//! Wraps a [`Membership`] state machine with the three things that move it:
//! - the transport's per-payload callback (inbound dispatch)
//! - a heartbeat task publishing our liveness every `heartbeat_interval`
//! - a sweep task evicting silent members every `cleanup_poll_interval`
//!
//! All three lock the same mutex for the whole of their state update, so
//! they never interleave mid-update. Publishing happens outside the lock.

use presence_core::transport::{MessageHandler, PubSub, SubscriptionId, TransportError};
use presence_core::{
    Clock, ConfigError, Member, MemberName, Membership, PresenceConfig, PresenceEvent,
    SessionState, UsageError,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::clock::RuntimeClock;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// State shared between the session handle and its callbacks.
struct Shared {
    membership: Mutex<Membership>,
    events: mpsc::UnboundedSender<PresenceEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Membership> {
        self.membership.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: PresenceEvent) {
        if self.events.send(event).is_err() {
            trace!("Event receiver dropped, discarding event");
        }
    }

    fn on_payload(&self, data: &[u8], now_ms: u64) {
        let mut membership = self.lock();
        if let Some(event) = membership.receive(data, now_ms) {
            self.emit(event);
        }
    }

    /// Returns false once the session is no longer joined.
    fn on_sweep(&self, now_ms: u64) -> bool {
        let mut membership = self.lock();
        if !membership.is_joined() {
            return false;
        }
        for event in membership.sweep(now_ms) {
            self.emit(event);
        }
        true
    }
}

/// This peer's participation in one channel.
///
/// Dropping a session disconnects it.
pub struct Session {
    shared: Arc<Shared>,
    transport: Arc<dyn PubSub>,
    clock: Arc<dyn Clock>,
    subscription: Option<SubscriptionId>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Create an idle session.
    ///
    /// Returns the session and the receiver its events are delivered on.
    pub fn new(
        name: MemberName,
        transport: Arc<dyn PubSub>,
        config: PresenceConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PresenceEvent>), SessionError> {
        Self::with_clock(name, transport, config, Arc::new(RuntimeClock::new()))
    }

    /// Create an idle session reading time from `clock`.
    pub fn with_clock(
        name: MemberName,
        transport: Arc<dyn PubSub>,
        config: PresenceConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PresenceEvent>), SessionError> {
        config.validate()?;
        let (events, events_rx) = mpsc::unbounded_channel();

        let session = Self {
            shared: Arc::new(Shared {
                membership: Mutex::new(Membership::new(name, config)),
                events,
            }),
            transport,
            clock,
            subscription: None,
            tasks: Vec::new(),
        };
        Ok((session, events_rx))
    }

    /// Subscribe to `channel` and start heartbeating and sweeping.
    ///
    /// Valid once per session. Later calls fail with
    /// [`UsageError::AlreadyJoined`] and change nothing.
    pub async fn join(&mut self, channel: &str) -> Result<(), SessionError> {
        let now_ms = self.clock.now_ms();
        self.shared.lock().join(channel, now_ms)?;

        let handler: MessageHandler = {
            let shared = Arc::clone(&self.shared);
            let clock = Arc::clone(&self.clock);
            Arc::new(move |data: &[u8]| shared.on_payload(data, clock.now_ms()))
        };

        match self.transport.subscribe(channel, handler).await {
            Ok(id) => {
                self.subscription = Some(id);
                self.shared.lock().subscribed(self.clock.now_ms());
            }
            Err(e) => {
                warn!("Subscribe to {} failed: {}", channel, e);
                self.shared.lock().abort_join();
                return Err(e.into());
            }
        }

        let config = self.config();
        self.tasks.push(tokio::spawn(heartbeat_loop(
            Arc::clone(&self.shared),
            Arc::clone(&self.transport),
            channel.to_string(),
            config.heartbeat_interval,
        )));
        self.tasks.push(tokio::spawn(sweep_loop(
            Arc::clone(&self.shared),
            Arc::clone(&self.clock),
            config.cleanup_poll_interval,
        )));

        info!(
            "Joined {} as {} ({} peer(s) connected)",
            channel,
            self.name(),
            self.transport.connected_peers()
        );
        Ok(())
    }

    /// Publish a chat message to the channel.
    pub async fn send(&self, payload: impl Into<String>) -> Result<(), SessionError> {
        let (channel, data) = {
            let membership = self.shared.lock();
            let data = membership.message(payload)?;
            let channel = membership
                .channel()
                .map(str::to_owned)
                .ok_or(UsageError::NotJoined)?;
            (channel, data)
        };

        debug!("Sending {} byte message on {}", data.len(), channel);
        self.transport.publish(&channel, data).await?;
        Ok(())
    }

    /// Stop heartbeating and sweeping. Safe to call any number of times,
    /// before or after `join`.
    ///
    /// Once this returns no further events are produced and no new
    /// heartbeat is started. On a multi-threaded runtime a heartbeat whose
    /// publish was already under way on another worker may still reach
    /// peers. The transport subscription is left in place; see
    /// [`Session::subscription`].
    pub fn disconnect(&mut self) {
        let first = self.shared.lock().disconnect();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if first {
            debug!("Session for {} torn down", self.name());
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state()
    }

    pub fn name(&self) -> MemberName {
        self.shared.lock().own_name().clone()
    }

    pub fn channel(&self) -> Option<String> {
        self.shared.lock().channel().map(str::to_owned)
    }

    pub fn joined_at(&self) -> Option<u64> {
        self.shared.lock().joined_at()
    }

    pub fn config(&self) -> PresenceConfig {
        self.shared.lock().config().clone()
    }

    /// Snapshot of known members sorted by name.
    pub fn members(&self) -> Vec<Member> {
        self.shared.lock().members()
    }

    pub fn is_member(&self, name: &str) -> bool {
        self.shared.lock().table().contains(name)
    }

    /// Transport subscription established by `join`, for the caller to
    /// release when it is done with the transport.
    pub fn subscription(&self) -> Option<SubscriptionId> {
        self.subscription
    }

    pub fn connected_peers(&self) -> usize {
        self.transport.connected_peers()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn heartbeat_loop(
    shared: Arc<Shared>,
    transport: Arc<dyn PubSub>,
    channel: String,
    interval: Duration,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let heartbeat = shared.lock().heartbeat();
        let data = match heartbeat {
            Ok(envelope) => envelope.encode(),
            Err(_) => break,
        };

        if !shared.lock().is_joined() {
            break;
        }
        // A lost heartbeat heals itself on the next tick.
        if let Err(e) = transport.publish(&channel, data).await {
            warn!("Heartbeat publish on {} failed: {}", channel, e);
        }
    }
    trace!("Heartbeat task for {} finished", channel);
}

async fn sweep_loop(shared: Arc<Shared>, clock: Arc<dyn Clock>, interval: Duration) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !shared.on_sweep(clock.now_ms()) {
            break;
        }
    }
    trace!("Sweep task finished");
}
