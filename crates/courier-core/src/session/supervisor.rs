//! Session registry and supervisor.
//!
//! The only place that may create, look up, or remove sessions. Owns the
//! id -> session map plus a separate creation-in-progress guard set; the
//! map lock is only ever held for map operations, so unrelated sessions
//! never serialize against each other.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

use super::health;
use super::machine;
use super::state::{LiveHandle, Session, SessionId, SessionStatus};
use crate::credentials;
use crate::event_bus::EventBus;
use crate::protocol::{InboundSink, MessageId, ProtocolConnector, ProtocolError};
use crate::store::SessionStore;
use tokio_util::sync::CancellationToken;

/// Timer and threshold knobs for the supervisor. The defaults match the
/// production gateway; tests rarely need to change them thanks to paused
/// time.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Keepalive/staleness watch period.
    pub keepalive_interval: Duration,
    /// Active heartbeat probe period.
    pub heartbeat_interval: Duration,
    /// Heartbeat age beyond which a connected session is warned about.
    pub heartbeat_stale_after: Duration,
    /// Fixed delay before re-opening after a restart-required close.
    pub restart_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_stale_after: Duration::from_secs(30),
            restart_delay: Duration::from_secs(3),
        }
    }
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    /// A creation for this id is already in flight. A no-op signal for the
    /// caller, not a failure.
    #[error("session creation already in progress: {0}")]
    AlreadyCreating(SessionId),

    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("session not connected: {0}")]
    NotConnected(SessionId),

    #[error("failed to open protocol client: {0}")]
    ConnectFailed(#[source] ProtocolError),

    #[error("protocol call failed: {0}")]
    Protocol(#[source] ProtocolError),
}

/// Releases the creation-in-progress lock for an id on every exit path.
struct CreationGuard<'a> {
    supervisor: &'a Supervisor,
    id: SessionId,
}

impl<'a> CreationGuard<'a> {
    fn claim(supervisor: &'a Supervisor, id: &SessionId) -> Result<Self, SupervisorError> {
        let mut creating = supervisor.creating.lock().unwrap();
        if !creating.insert(id.clone()) {
            return Err(SupervisorError::AlreadyCreating(id.clone()));
        }
        Ok(Self {
            supervisor,
            id: id.clone(),
        })
    }
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        self.supervisor.creating.lock().unwrap().remove(&self.id);
    }
}

/// Supervises the fleet of protocol sessions.
///
/// Shared as `Arc<Supervisor>`; session tasks hold a clone so reconnection
/// and removal route back through the registry.
pub struct Supervisor {
    config: SupervisorConfig,
    connector: Arc<dyn ProtocolConnector>,
    store: Arc<dyn SessionStore>,
    events: Arc<EventBus>,
    inbound: Option<Arc<dyn InboundSink>>,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    creating: Mutex<HashSet<SessionId>>,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        connector: Arc<dyn ProtocolConnector>,
        store: Arc<dyn SessionStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            connector,
            store,
            events,
            inbound: None,
            sessions: Mutex::new(HashMap::new()),
            creating: Mutex::new(HashSet::new()),
        }
    }

    /// Attach the downstream consumer for raw inbound messages.
    pub fn with_inbound_sink(mut self, sink: Arc<dyn InboundSink>) -> Self {
        self.inbound = Some(sink);
        self
    }

    pub(crate) fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub(crate) fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub(crate) fn inbound(&self) -> Option<&Arc<dyn InboundSink>> {
        self.inbound.as_ref()
    }

    /// Get a session by id.
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    /// All registered sessions.
    pub fn list_all(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }

    /// True iff a session exists and its status is `connected`.
    pub fn is_live(&self, id: &SessionId) -> bool {
        self.get(id)
            .map(|s| s.status() == SessionStatus::Connected)
            .unwrap_or(false)
    }

    /// Create (or re-create) the session for `id`.
    ///
    /// Guarded per id: a second concurrent call observes `AlreadyCreating`
    /// and performs no side effects. Any existing live handle is torn down
    /// first, without a protocol-level sign-out. On failure the guard is
    /// released and no half-registered session is left behind.
    pub async fn create_session(
        self: &Arc<Self>,
        id: SessionId,
    ) -> Result<Arc<Session>, SupervisorError> {
        let _guard = CreationGuard::claim(self, &id)?;
        log::info!("session {}: creating", id);

        let (session, existed) = {
            let mut sessions = self.sessions.lock().unwrap();
            match sessions.get(&id) {
                Some(session) => (Arc::clone(session), true),
                None => {
                    let session = Arc::new(Session::new(id.clone()));
                    sessions.insert(id.clone(), Arc::clone(&session));
                    (session, false)
                }
            }
        };

        // One live handle per id: replace, never accumulate.
        if let Some(live) = session.take_live() {
            log::debug!("session {}: tearing down previous protocol handle", id);
            teardown_live(live).await;
        }

        let (creds, has_persisted) = credentials::load(self.store.as_ref(), &id).await;
        session.set_has_persisted_credentials(has_persisted);
        session.set_status(SessionStatus::Connecting);
        session.set_qr(None);

        let (client, events) = match self.connector.connect(&id, creds).await {
            Ok(opened) => opened,
            Err(err) => {
                log::warn!("session {}: protocol client failed to open: {}", id, err);
                if existed {
                    session.set_status(SessionStatus::Disconnected);
                    self.persist_and_emit_status(&session, SessionStatus::Disconnected)
                        .await;
                } else {
                    self.sessions.lock().unwrap().remove(&id);
                }
                return Err(SupervisorError::ConnectFailed(err));
            }
        };

        let cancel = CancellationToken::new();
        let mut tasks = vec![machine::spawn_event_pump(
            Arc::clone(self),
            Arc::clone(&session),
            events,
        )];
        tasks.extend(health::spawn_monitors(self, &session, &cancel));
        session.install_live(LiveHandle {
            client,
            cancel,
            tasks,
        });

        Ok(session)
    }

    /// Remove a session from the registry.
    ///
    /// Stops the health monitor and event pump first so a stale timer
    /// cannot resurrect the session. When `sign_out` is set and the
    /// session is currently connected, a best-effort protocol sign-out is
    /// performed before the entry is deleted; pass `sign_out = false` when
    /// the protocol layer already invalidated the pairing.
    ///
    /// Returns the removed session, or `None` if the id was not
    /// registered.
    pub async fn remove_session(&self, id: &SessionId, sign_out: bool) -> Option<Arc<Session>> {
        let session = self.get(id)?;
        let was_connected = session.status() == SessionStatus::Connected;

        if let Some(live) = session.take_live() {
            live.cancel.cancel();
            for task in &live.tasks {
                task.abort();
            }
            if sign_out && was_connected {
                if let Err(err) = live.client.sign_out().await {
                    log::warn!("session {}: sign-out failed: {}", id, err);
                }
            } else {
                live.client.teardown().await;
            }
        }

        self.sessions.lock().unwrap().remove(id);
        session.set_status(SessionStatus::Disconnected);
        self.persist_and_emit_status(&session, SessionStatus::Disconnected)
            .await;
        log::info!("session {}: removed (sign_out: {})", id, sign_out);
        Some(session)
    }

    /// Send a message through a connected session.
    pub async fn send_message(
        &self,
        id: &SessionId,
        target: &str,
        content: &str,
    ) -> Result<MessageId, SupervisorError> {
        let session = self
            .get(id)
            .ok_or_else(|| SupervisorError::NotFound(id.clone()))?;
        if session.status() != SessionStatus::Connected {
            return Err(SupervisorError::NotConnected(id.clone()));
        }
        let client = session
            .client()
            .ok_or_else(|| SupervisorError::NotConnected(id.clone()))?;
        client
            .send_message(target, content)
            .await
            .map_err(SupervisorError::Protocol)
    }

    /// Startup sweep: bring up every session the datastore has credentials
    /// for. Individual failures are logged and tolerated. Returns the
    /// number of sessions brought up.
    pub async fn reconnect_all_with_credentials(self: &Arc<Self>) -> usize {
        let ids = match self.store.list_sessions_with_credentials().await {
            Ok(ids) => ids,
            Err(err) => {
                log::error!("bulk reconnect: failed to list credentialed sessions: {}", err);
                return 0;
            }
        };

        log::info!("bulk reconnect: {} credentialed session(s)", ids.len());
        let mut brought_up = 0;
        for id in ids {
            match self.create_session(id.clone()).await {
                Ok(_) => brought_up += 1,
                Err(err) => log::warn!("bulk reconnect: session {} failed: {}", id, err),
            }
        }
        brought_up
    }

    /// Best-effort: persist the status row and fan the change out. Neither
    /// failure blocks the caller's transition.
    pub(crate) async fn persist_and_emit_status(&self, session: &Session, status: SessionStatus) {
        if let Err(err) = self.store.update_session_status(&session.id, status).await {
            log::warn!(
                "session {}: failed to persist status {}: {}",
                session.id,
                status,
                err
            );
        }
        self.events.emit_status(&session.id, status);
    }
}

async fn teardown_live(live: LiveHandle) {
    live.cancel.cancel();
    for task in &live.tasks {
        task.abort();
    }
    live.client.teardown().await;
}
