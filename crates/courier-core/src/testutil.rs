//! Shared mock collaborators for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Notify};

use crate::credentials::CredentialState;
use crate::event_bus::EventBus;
use crate::protocol::{
    InboundMessage, InboundSink, MessageId, ProtocolClient, ProtocolConnector, ProtocolError,
    ProtocolEvent,
};
use crate::session::{SessionId, Supervisor, SupervisorConfig};
use crate::store::MemoryStore;

/// Store a valid credential blob so the session counts as previously
/// paired.
pub(crate) fn seed_credentials(store: &MemoryStore, id: &SessionId) {
    let state = CredentialState {
        creds: json!({"registered": true}),
        keys: json!({}),
    };
    store.put_blob(id, serde_json::to_vec(&state).unwrap());
}

/// Protocol client mock: records calls, never talks to a network.
pub(crate) struct MockClient {
    sent: Mutex<Vec<(String, String)>>,
    probes: AtomicU32,
    probe_ok: AtomicBool,
    sign_outs: AtomicU32,
    torn_down: AtomicBool,
}

impl MockClient {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            probes: AtomicU32::new(0),
            probe_ok: AtomicBool::new(true),
            sign_outs: AtomicU32::new(0),
            torn_down: AtomicBool::new(false),
        })
    }

    pub(crate) fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_probes(&self) {
        self.probe_ok.store(false, Ordering::SeqCst);
    }

    pub(crate) fn sign_outs(&self) -> u32 {
        self.sign_outs.load(Ordering::SeqCst)
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    async fn send_message(&self, target: &str, content: &str) -> Result<MessageId, ProtocolError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((target.to_string(), content.to_string()));
        Ok(MessageId(format!("msg-{}", sent.len())))
    }

    async fn probe(&self) -> Result<(), ProtocolError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.probe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProtocolError::Transport("probe timed out".into()))
        }
    }

    async fn sign_out(&self) -> Result<(), ProtocolError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn teardown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ConnectorState {
    connects: HashMap<SessionId, u32>,
    clients: HashMap<SessionId, Vec<Arc<MockClient>>>,
    senders: HashMap<SessionId, Vec<mpsc::Sender<ProtocolEvent>>>,
    credentials: HashMap<SessionId, CredentialState>,
    fail_next: bool,
}

/// Connector mock. Every successful connect yields a fresh [`MockClient`]
/// plus the sending half of its event stream, which tests drive directly.
#[derive(Default)]
pub(crate) struct MockConnector {
    state: Mutex<ConnectorState>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl MockConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn connect_count(&self, id: &SessionId) -> u32 {
        self.state.lock().unwrap().connects.get(id).copied().unwrap_or(0)
    }

    pub(crate) fn last_client(&self, id: &SessionId) -> Option<Arc<MockClient>> {
        self.state.lock().unwrap().clients.get(id)?.last().cloned()
    }

    /// Sending half of the most recently opened event stream for `id`.
    pub(crate) fn sender(&self, id: &SessionId) -> Option<mpsc::Sender<ProtocolEvent>> {
        self.state.lock().unwrap().senders.get(id)?.last().cloned()
    }

    /// Credentials the supervisor passed into the latest connect.
    pub(crate) fn last_credentials(&self, id: &SessionId) -> Option<CredentialState> {
        self.state.lock().unwrap().credentials.get(id).cloned()
    }

    /// Make the next connect fail with a handshake error.
    pub(crate) fn fail_next_connect(&self) {
        self.state.lock().unwrap().fail_next = true;
    }

    /// Park every subsequent connect until the returned notify fires.
    pub(crate) fn gate_connects(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl ProtocolConnector for MockConnector {
    async fn connect(
        &self,
        id: &SessionId,
        credentials: CredentialState,
    ) -> Result<(Arc<dyn ProtocolClient>, mpsc::Receiver<ProtocolEvent>), ProtocolError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_next {
            state.fail_next = false;
            return Err(ProtocolError::Handshake("connect refused by mock".into()));
        }

        let client = MockClient::new();
        let (tx, rx) = mpsc::channel(32);
        *state.connects.entry(id.clone()).or_insert(0) += 1;
        state.clients.entry(id.clone()).or_default().push(Arc::clone(&client));
        state.senders.entry(id.clone()).or_default().push(tx);
        state.credentials.insert(id.clone(), credentials);

        Ok((client as Arc<dyn ProtocolClient>, rx))
    }
}

/// Inbound sink mock that records everything delivered.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) received: Mutex<Vec<(SessionId, InboundMessage)>>,
}

impl RecordingSink {
    pub(crate) fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl InboundSink for RecordingSink {
    async fn deliver(&self, session: &SessionId, message: InboundMessage) {
        self.received.lock().unwrap().push((session.clone(), message));
    }
}

/// A supervisor wired to in-process mocks.
pub(crate) struct Harness {
    pub(crate) supervisor: Arc<Supervisor>,
    pub(crate) connector: Arc<MockConnector>,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) events: Arc<EventBus>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::build(SupervisorConfig::default(), None)
    }

    pub(crate) fn with_sink(sink: Arc<RecordingSink>) -> Self {
        Self::build(SupervisorConfig::default(), Some(sink))
    }

    /// Keepalive pushed out far enough that long time advances in a test
    /// never trigger the staleness watch.
    pub(crate) fn with_quiet_keepalive() -> Self {
        let config = SupervisorConfig {
            keepalive_interval: std::time::Duration::from_secs(86_400),
            ..SupervisorConfig::default()
        };
        Self::build(config, None)
    }

    fn build(config: SupervisorConfig, sink: Option<Arc<RecordingSink>>) -> Self {
        let connector = MockConnector::new();
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(EventBus::new());

        let mut supervisor = Supervisor::new(
            config,
            Arc::clone(&connector) as Arc<dyn ProtocolConnector>,
            Arc::clone(&store) as Arc<dyn crate::store::SessionStore>,
            Arc::clone(&events),
        );
        if let Some(sink) = sink {
            supervisor = supervisor.with_inbound_sink(sink);
        }

        Self {
            supervisor: Arc::new(supervisor),
            connector,
            store,
            events,
        }
    }
}
