//! Pub/sub transport contract.
//!
//! The presence protocol rides on an existing publish/subscribe bus. It
//! needs exactly three things from it:
//! - publish bytes to every other subscriber of a channel
//! - subscribe to a channel with a per-payload callback
//! - report how many peers are connected

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Unknown subscription: {0:?}")]
    UnknownSubscription(SubscriptionId),

    #[error("Transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Callback invoked once per inbound payload.
pub type MessageHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Handle identifying one subscription, used to release it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Publish/subscribe bus.
///
/// Implementations must not deliver a payload back to the subscriber that
/// published it.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Best-effort delivery to all other subscribers of `channel`.
    async fn publish(&self, channel: &str, data: Vec<u8>) -> Result<()>;

    /// Start delivering payloads published to `channel` to `handler`.
    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<SubscriptionId>;

    /// Stop a subscription.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    /// Number of currently connected peers, excluding ourselves.
    fn connected_peers(&self) -> usize;
}
