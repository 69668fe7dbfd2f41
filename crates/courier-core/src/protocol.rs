//! Chat-protocol client collaborator interfaces.
//!
//! The actual protocol library (handshake, multi-device crypto, wire
//! framing) is a black box to this crate. The supervisor only needs a way
//! to open a client for a session, a stream of lifecycle events, and a
//! handful of calls on the live handle: send, probe, sign-out, teardown.
//!
//! Implementations bridge a real protocol stack; tests use mocks.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::credentials::CredentialState;
use crate::session::SessionId;

/// Why the protocol layer closed a connection.
///
/// The supervisor only distinguishes the classes it acts on; everything
/// else collapses into `Other` with the raw status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Expected immediately after a successful QR scan; the library wants
    /// the session re-opened with the freshly persisted credentials.
    RestartRequired,
    /// The device pairing was deliberately signed out.
    LoggedOut,
    /// The stored session is unrecoverable; requires a fresh pairing.
    BadSession,
    ConnectionLost,
    TimedOut,
    Other(u32),
}

impl DisconnectReason {
    /// Terminal reasons tear the session down and are never auto-retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DisconnectReason::LoggedOut | DisconnectReason::BadSession)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::RestartRequired => write!(f, "restart_required"),
            DisconnectReason::LoggedOut => write!(f, "logged_out"),
            DisconnectReason::BadSession => write!(f, "bad_session"),
            DisconnectReason::ConnectionLost => write!(f, "connection_lost"),
            DisconnectReason::TimedOut => write!(f, "timed_out"),
            DisconnectReason::Other(code) => write!(f, "other({})", code),
        }
    }
}

/// A raw inbound message. The core does not interpret the payload; it
/// stamps liveness and hands the message to the [`InboundSink`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub from: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Identifier the protocol library assigns to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageId(pub String);

/// Lifecycle events emitted by a protocol client, delivered in stream
/// order per session.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    /// A pairing QR code was issued for an uncredentialed session.
    QrIssued { payload: String },
    Connecting,
    /// The connection is open and authenticated.
    Open,
    /// The library re-serialized its credential material; persist it.
    CredentialsUpdated(CredentialState),
    Message(InboundMessage),
    Closed { reason: DisconnectReason },
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// A live protocol handle for one session.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Send a message to a target address; returns the library-assigned id.
    async fn send_message(&self, target: &str, content: &str) -> Result<MessageId, ProtocolError>;

    /// Lightweight no-op round trip used as a liveness probe.
    async fn probe(&self) -> Result<(), ProtocolError>;

    /// Protocol-level sign-out, invalidating the device pairing.
    async fn sign_out(&self) -> Result<(), ProtocolError>;

    /// Drop the transport without signing out. Must be safe to call on an
    /// already-dead handle.
    async fn teardown(&self);
}

/// Factory that opens protocol clients.
///
/// `connect` returns the handle plus the receiving end of its event
/// stream. The stream closes when the underlying connection is gone.
#[async_trait]
pub trait ProtocolConnector: Send + Sync {
    async fn connect(
        &self,
        id: &SessionId,
        credentials: CredentialState,
    ) -> Result<(Arc<dyn ProtocolClient>, mpsc::Receiver<ProtocolEvent>), ProtocolError>;
}

/// Downstream consumer of raw inbound messages (contact/conversation
/// business logic). Out of scope for this crate; the supervisor only
/// forwards.
#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn deliver(&self, session: &SessionId, message: InboundMessage);
}
