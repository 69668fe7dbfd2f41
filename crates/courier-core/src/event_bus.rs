//! Push fan-out to external UI clients.
//!
//! The supervisor publishes session status changes and QR codes here; the
//! API layer (WebSocket, SSE, whatever the embedder runs) subscribes and
//! forwards. Publishing is fire-and-forget: a fan-out failure never blocks
//! a state transition.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::session::{SessionId, SessionStatus};

/// Events beyond this capacity cause slow subscribers to miss events (lag).
const DEFAULT_CAPACITY: usize = 1024;

/// A fan-out event: a routing key plus a JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEvent {
    /// Routing key, e.g. `session:status:<id>` or `session:qr:<id>`.
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl BroadcastEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Broadcast bus for session events.
///
/// Backed by a tokio broadcast channel: every subscriber sees every event
/// emitted after it subscribed.
pub struct EventBus {
    sender: broadcast::Sender<BroadcastEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Returns how many received it; with
    /// no subscribers the event is dropped and 0 is returned.
    pub fn emit<T: Serialize>(&self, event_type: &str, payload: &T) -> usize {
        let json_payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("failed to serialize fan-out payload: {}", e);
                return 0;
            }
        };

        self.sender
            .send(BroadcastEvent::new(event_type, json_payload))
            .unwrap_or(0)
    }

    /// Publish a session status change.
    pub fn emit_status(&self, id: &SessionId, status: SessionStatus) -> usize {
        self.emit(
            &format!("session:status:{}", id),
            &serde_json::json!({ "sessionId": id, "status": status }),
        )
    }

    /// Publish a freshly issued pairing QR code.
    pub fn emit_qr(&self, id: &SessionId, qr: &str) -> usize {
        self.emit(
            &format!("session:qr:{}", id),
            &serde_json::json!({ "sessionId": id, "qr": qr }),
        )
    }

    /// Subscribe to all events on this bus. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
