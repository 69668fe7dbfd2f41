//! Connection state machine.
//!
//! One event pump task per live protocol handle. Events are handled
//! strictly in stream order; each transition updates the in-memory status
//! first, then best-effort persists the status row and emits to the push
//! fan-out. Persistence and fan-out failures are logged and never block a
//! transition.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::reconnect;
use super::state::{Session, SessionStatus};
use super::supervisor::{Supervisor, SupervisorError};
use crate::credentials;
use crate::protocol::{DisconnectReason, InboundMessage, ProtocolEvent};

/// Spawn the event pump for a freshly opened protocol client.
///
/// The pump ends when the event stream closes, i.e. when the underlying
/// connection is gone and the library has said everything it will say.
pub(crate) fn spawn_event_pump(
    supervisor: Arc<Supervisor>,
    session: Arc<Session>,
    mut events: mpsc::Receiver<ProtocolEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            handle_event(&supervisor, &session, event).await;
        }
        log::debug!("session {}: protocol event stream ended", session.id);
    })
}

/// Apply one protocol event to the session.
pub(crate) async fn handle_event(
    supervisor: &Arc<Supervisor>,
    session: &Arc<Session>,
    event: ProtocolEvent,
) {
    match event {
        ProtocolEvent::QrIssued { payload } => {
            log::info!("session {}: pairing QR issued", session.id);
            session.set_qr(Some(payload.clone()));
            session.set_status(SessionStatus::QrPending);
            supervisor.events().emit_qr(&session.id, &payload);
            supervisor
                .persist_and_emit_status(session, SessionStatus::QrPending)
                .await;
        }

        ProtocolEvent::Connecting => {
            session.set_status(SessionStatus::Connecting);
            supervisor
                .persist_and_emit_status(session, SessionStatus::Connecting)
                .await;
        }

        ProtocolEvent::Open => {
            log::info!("session {}: connected", session.id);
            session.set_status(SessionStatus::Connected);
            session.set_qr(None);
            session.reset_attempts();
            session.clear_reconnecting();
            supervisor
                .persist_and_emit_status(session, SessionStatus::Connected)
                .await;
        }

        ProtocolEvent::CredentialsUpdated(state) => {
            if credentials::save(supervisor.store().as_ref(), &session.id, &state).await {
                session.set_has_persisted_credentials(true);
            }
        }

        ProtocolEvent::Message(message) => {
            session.mark_inbound();
            deliver_inbound(supervisor, session, message).await;
        }

        ProtocolEvent::Closed { reason } => {
            log::info!("session {}: connection closed ({})", session.id, reason);
            session.set_status(SessionStatus::Disconnected);
            supervisor
                .persist_and_emit_status(session, SessionStatus::Disconnected)
                .await;
            handle_closed(supervisor, session, reason);
        }
    }
}

async fn deliver_inbound(
    supervisor: &Arc<Supervisor>,
    session: &Arc<Session>,
    message: InboundMessage,
) {
    match supervisor.inbound() {
        Some(sink) => sink.deliver(&session.id, message).await,
        None => log::debug!(
            "session {}: inbound message from {} dropped, no sink configured",
            session.id,
            message.from
        ),
    }
}

fn handle_closed(supervisor: &Arc<Supervisor>, session: &Arc<Session>, reason: DisconnectReason) {
    match reason {
        // Expected right after a successful QR scan: the library wants a
        // clean re-open with the just-persisted credentials.
        DisconnectReason::RestartRequired => {
            let supervisor = Arc::clone(supervisor);
            let session = Arc::clone(session);
            let delay = supervisor.config().restart_delay;
            tokio::spawn(async move {
                sleep(delay).await;
                // Skip the recreate if the session was removed (or
                // replaced) while the delay was pending.
                let still_registered = supervisor
                    .get(&session.id)
                    .map(|current| Arc::ptr_eq(&current, &session))
                    .unwrap_or(false);
                if !still_registered {
                    log::debug!(
                        "session {}: post-scan restart dropped, session was removed",
                        session.id
                    );
                    return;
                }
                match supervisor.create_session(session.id.clone()).await {
                    Ok(_) => {}
                    Err(SupervisorError::AlreadyCreating(_)) => {
                        log::debug!(
                            "session {}: restart skipped, creation already in flight",
                            session.id
                        );
                    }
                    Err(err) => {
                        log::warn!("session {}: post-scan restart failed: {}", session.id, err);
                    }
                }
            });
        }

        // Deliberate sign-out or unrecoverable session: tear down, never
        // auto-retry. The protocol layer already invalidated the pairing,
        // so removal skips the sign-out call.
        DisconnectReason::LoggedOut | DisconnectReason::BadSession => {
            log::info!(
                "session {}: terminal disconnect ({}), removing",
                session.id,
                reason
            );
            let supervisor = Arc::clone(supervisor);
            let id = session.id.clone();
            // Detached so the removal does not abort the pump task that is
            // still delivering this event.
            tokio::spawn(async move {
                supervisor.remove_session(&id, false).await;
            });
        }

        _ => {
            if !reconnect::schedule(Arc::clone(supervisor), Arc::clone(session), reason) {
                log::info!(
                    "session {}: not eligible for reconnection (attempts: {})",
                    session.id,
                    session.reconnect_attempts()
                );
            }
        }
    }
}
