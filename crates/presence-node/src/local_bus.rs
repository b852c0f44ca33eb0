//! In-process pub/sub bus.
//!
//! Every participant gets its own [`LocalPeer`] endpoint from a shared
//! [`LocalBus`]. Publishing delivers synchronously to every subscriber of
//! the channel owned by a *different* endpoint, mirroring a network bus that
//! never echoes a payload back to its sender.

use async_trait::async_trait;
use presence_core::transport::{MessageHandler, PubSub, Result, SubscriptionId, TransportError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

struct Subscriber {
    peer: u64,
    channel: String,
    handler: MessageHandler,
}

#[derive(Default)]
struct BusState {
    closed: bool,
    next_peer: u64,
    next_subscription: u64,
    peers: HashSet<u64>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
}

impl BusState {
    /// Handlers for `channel`, excluding those owned by `sender`.
    fn handlers_for(&self, channel: &str, sender: Option<u64>) -> Vec<MessageHandler> {
        self.subscribers
            .values()
            .filter(|s| s.channel == channel && Some(s.peer) != sender)
            .map(|s| Arc::clone(&s.handler))
            .collect()
    }
}

/// Shared hub. Cheap to clone.
#[derive(Clone, Default)]
pub struct LocalBus {
    state: Arc<Mutex<BusState>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint to the bus.
    pub fn connect(&self) -> LocalPeer {
        let mut state = lock(&self.state);
        let id = state.next_peer;
        state.next_peer += 1;
        state.peers.insert(id);
        debug!("Local peer {} connected ({} total)", id, state.peers.len());

        LocalPeer {
            id,
            state: Arc::clone(&self.state),
            fail_publish: AtomicBool::new(false),
            published: AtomicUsize::new(0),
        }
    }

    /// Deliver raw bytes to every subscriber of `channel`.
    ///
    /// Stands in for a foreign peer sending arbitrary data. Returns the
    /// number of handlers invoked.
    pub fn inject(&self, channel: &str, data: &[u8]) -> usize {
        let handlers = lock(&self.state).handlers_for(channel, None);
        for handler in &handlers {
            handler(data);
        }
        handlers.len()
    }

    /// Number of attached endpoints.
    pub fn peer_count(&self) -> usize {
        lock(&self.state).peers.len()
    }

    /// Shut the bus down. Every later operation fails with `Closed`.
    pub fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.subscribers.clear();
    }
}

/// One participant's endpoint on a [`LocalBus`].
pub struct LocalPeer {
    id: u64,
    state: Arc<Mutex<BusState>>,
    fail_publish: AtomicBool,
    published: AtomicUsize,
}

impl LocalPeer {
    /// Make every publish fail until switched off again.
    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Number of successful publishes from this endpoint.
    pub fn published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }
}

impl Drop for LocalPeer {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.peers.remove(&self.id);
        state.subscribers.retain(|_, s| s.peer != self.id);
    }
}

#[async_trait]
impl PubSub for LocalPeer {
    async fn publish(&self, channel: &str, data: Vec<u8>) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed(format!(
                "local peer {} is set to fail",
                self.id
            )));
        }

        let handlers = {
            let state = lock(&self.state);
            if state.closed {
                return Err(TransportError::Closed);
            }
            state.handlers_for(channel, Some(self.id))
        };

        // Handlers run without the bus lock held so they may publish in turn.
        trace!(
            "Peer {} publishing {} bytes to {} subscriber(s) on {}",
            self.id,
            data.len(),
            handlers.len(),
            channel
        );
        for handler in &handlers {
            handler(&data);
        }
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<SubscriptionId> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(TransportError::Closed);
        }
        let id = SubscriptionId(state.next_subscription);
        state.next_subscription += 1;
        state.subscribers.insert(
            id,
            Subscriber {
                peer: self.id,
                channel: channel.to_string(),
                handler,
            },
        );
        debug!("Peer {} subscribed to {} ({:?})", self.id, channel, id);
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(TransportError::Closed);
        }
        let owned = state
            .subscribers
            .get(&id)
            .is_some_and(|s| s.peer == self.id);
        if !owned {
            return Err(TransportError::UnknownSubscription(id));
        }
        state.subscribers.remove(&id);
        Ok(())
    }

    fn connected_peers(&self) -> usize {
        lock(&self.state).peers.len().saturating_sub(1)
    }
}

fn lock(state: &Mutex<BusState>) -> MutexGuard<'_, BusState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}
