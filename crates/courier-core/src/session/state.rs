//! Per-session state.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::protocol::ProtocolClient;

/// Unique identifier for a session (one per registered device pairing).
///
/// The id is opaque and externally assigned - typically the primary key of
/// the device-pairing row in the caller's datastore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh random id. Useful for embedders and tests that do not
    /// bring their own identifiers.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    QrPending,
    Connected,
    Disconnected,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::QrPending => "qr_pending",
            SessionStatus::Connected => "connected",
            SessionStatus::Disconnected => "disconnected",
        };
        write!(f, "{}", s)
    }
}

/// Serializable snapshot of a session, for API layers and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub reconnect_attempts: u32,
    pub has_persisted_credentials: bool,
    pub last_inbound_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

/// Everything tied to one live protocol handle: the client itself, the
/// cancellation token shared by the monitor loops, and the spawned tasks
/// (event pump, keepalive, heartbeat).
///
/// Replaced wholesale when the session reconnects; tearing one down never
/// signs the device out.
pub(crate) struct LiveHandle {
    pub(crate) client: Arc<dyn ProtocolClient>,
    pub(crate) cancel: CancellationToken,
    pub(crate) tasks: Vec<JoinHandle<()>>,
}

/// A single supervised session.
///
/// Shared as `Arc<Session>` between the supervisor, the event pump, and the
/// health monitor loops; all mutable state uses interior mutability. Locks
/// are only ever held for field access, never across an await.
pub struct Session {
    pub id: SessionId,

    status: Mutex<SessionStatus>,

    /// Latest QR payload while pairing is pending.
    qr: Mutex<Option<String>>,

    /// Timestamp of the most recent inbound protocol message.
    last_inbound_at: Mutex<Option<DateTime<Utc>>>,

    /// Timestamp of the most recent successful liveness probe.
    last_heartbeat_at: Mutex<Option<DateTime<Utc>>>,

    /// Consecutive reconnect attempts; reset to zero on a successful
    /// `Connected` transition.
    reconnect_attempts: AtomicU32,

    /// Whether a credential blob existed when the session was created (or
    /// was persisted since). Sessions without credentials are brand-new
    /// pairings and never auto-reconnect.
    has_persisted_credentials: AtomicBool,

    /// Guard against overlapping reconnection attempts.
    reconnecting: AtomicBool,

    /// The live protocol handle. At most one per session at any time.
    pub(crate) live: Mutex<Option<LiveHandle>>,
}

impl Session {
    pub(crate) fn new(id: SessionId) -> Self {
        Self {
            id,
            status: Mutex::new(SessionStatus::Connecting),
            qr: Mutex::new(None),
            last_inbound_at: Mutex::new(None),
            last_heartbeat_at: Mutex::new(None),
            reconnect_attempts: AtomicU32::new(0),
            has_persisted_credentials: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            live: Mutex::new(None),
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap()
    }

    pub(crate) fn set_status(&self, status: SessionStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn qr(&self) -> Option<String> {
        self.qr.lock().unwrap().clone()
    }

    pub(crate) fn set_qr(&self, payload: Option<String>) {
        *self.qr.lock().unwrap() = payload;
    }

    pub fn last_inbound_at(&self) -> Option<DateTime<Utc>> {
        *self.last_inbound_at.lock().unwrap()
    }

    pub(crate) fn mark_inbound(&self) {
        *self.last_inbound_at.lock().unwrap() = Some(Utc::now());
    }

    pub fn last_heartbeat_at(&self) -> Option<DateTime<Utc>> {
        *self.last_heartbeat_at.lock().unwrap()
    }

    pub(crate) fn mark_heartbeat(&self) {
        *self.last_heartbeat_at.lock().unwrap() = Some(Utc::now());
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Increment the attempt counter and return the attempt number just
    /// claimed (1-based).
    pub(crate) fn claim_attempt(&self) -> u32 {
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn reset_attempts(&self) {
        self.reconnect_attempts.store(0, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn set_attempts(&self, n: u32) {
        self.reconnect_attempts.store(n, Ordering::SeqCst);
    }

    pub fn has_persisted_credentials(&self) -> bool {
        self.has_persisted_credentials.load(Ordering::SeqCst)
    }

    pub(crate) fn set_has_persisted_credentials(&self, value: bool) {
        self.has_persisted_credentials.store(value, Ordering::SeqCst);
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    /// Claim the reconnecting guard. Returns false if another reconnection
    /// attempt is already in flight.
    pub(crate) fn begin_reconnect(&self) -> bool {
        self.reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn clear_reconnecting(&self) {
        self.reconnecting.store(false, Ordering::SeqCst);
    }

    /// Clone the live protocol client, if any.
    pub(crate) fn client(&self) -> Option<Arc<dyn ProtocolClient>> {
        self.live.lock().unwrap().as_ref().map(|l| Arc::clone(&l.client))
    }

    /// Detach the live handle so it can be torn down without holding the
    /// lock across an await.
    pub(crate) fn take_live(&self) -> Option<LiveHandle> {
        self.live.lock().unwrap().take()
    }

    pub(crate) fn install_live(&self, handle: LiveHandle) {
        *self.live.lock().unwrap() = Some(handle);
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            status: self.status(),
            reconnect_attempts: self.reconnect_attempts(),
            has_persisted_credentials: self.has_persisted_credentials(),
            last_inbound_at: self.last_inbound_at(),
            last_heartbeat_at: self.last_heartbeat_at(),
        }
    }
}
