//! presence-core: Membership and presence protocol over a pub/sub bus.
//!
//! This crate provides the runtime-independent pieces:
//! - Envelope encoding for heartbeats and chat messages
//! - The presence table and liveness sweeping
//! - Inbound dispatch and the session state machine
//! - The `PubSub` and `Clock` trait abstractions
//!
//! Timers and the transport itself live with the driver (see `presence-node`).

pub mod clock;
pub mod dispatch;
pub mod envelope;
pub mod events;
pub mod member_name;
pub mod membership;
pub mod presence;
pub mod transport;

pub use clock::{Clock, SystemClock};
pub use envelope::{DecodeError, Envelope, MAX_ENVELOPE_SIZE};
pub use events::PresenceEvent;
pub use member_name::{MemberName, MemberNameError};
pub use membership::{Membership, SessionState, UsageError};
pub use presence::{ConfigError, Member, Observation, PresenceConfig, PresenceTable};
pub use transport::{MessageHandler, PubSub, SubscriptionId, TransportError};
