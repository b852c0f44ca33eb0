//! presence-node: Tokio driver for the presence protocol.
//!
//! Runs a `presence-core` membership over any `PubSub` transport, owning
//! the heartbeat and sweep timers. Also ships an in-process bus used by the
//! demo binary and the integration tests.

pub mod clock;
pub mod local_bus;
pub mod session;

pub use clock::RuntimeClock;
pub use local_bus::{LocalBus, LocalPeer};
pub use session::{Session, SessionError};
