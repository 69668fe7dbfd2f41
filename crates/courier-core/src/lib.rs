//! # courier-core
//!
//! Connection supervision core for Courier, the multi-session chat
//! gateway. This crate keeps a fleet of independent, long-lived
//! chat-protocol client sessions (one per registered device pairing)
//! alive, authenticated, and observable.
//!
//! The crate is framework-agnostic: the protocol library, the datastore,
//! and the inbound-message business logic are collaborators behind traits,
//! and the push fan-out is a broadcast bus any API layer can subscribe to.
//!
//! ## Key Concepts
//!
//! - **Session**: one supervised protocol connection per device pairing
//! - **Supervisor**: the registry; the only place sessions are created,
//!   looked up, or removed
//! - **Reconnection policy**: eligibility rules plus a stepped backoff
//!   schedule for automatic recovery
//! - **Health monitor**: keepalive watch and active heartbeat per session

pub mod credentials;
pub mod event_bus;
pub mod protocol;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use credentials::CredentialState;
pub use event_bus::{BroadcastEvent, EventBus};
pub use protocol::{
    DisconnectReason, InboundMessage, InboundSink, MessageId, ProtocolClient, ProtocolConnector,
    ProtocolError, ProtocolEvent,
};
pub use session::{
    Session, SessionId, SessionInfo, SessionStatus, Supervisor, SupervisorConfig, SupervisorError,
};
pub use store::{MemoryStore, SessionStore, StoreError};
