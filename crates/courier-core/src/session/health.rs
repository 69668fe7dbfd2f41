//! Health monitor: keepalive watch and active heartbeat.
//!
//! Two independent periodic loops per live session, both bound to the
//! live handle's cancellation token so removal stops them synchronously.
//! The keepalive watch is the safety net for missed or delayed `Closed`
//! events; the heartbeat is a lightweight round trip that keeps
//! `last_heartbeat_at` honest. Neither loop ever tears a session down by
//! itself.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

use super::reconnect;
use super::state::{Session, SessionStatus};
use super::supervisor::Supervisor;
use crate::protocol::DisconnectReason;

/// Spawn both monitor loops for a freshly opened protocol client.
pub(crate) fn spawn_monitors(
    supervisor: &Arc<Supervisor>,
    session: &Arc<Session>,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(run_keepalive(
            Arc::clone(supervisor),
            Arc::clone(session),
            cancel.clone(),
        )),
        tokio::spawn(run_heartbeat(
            Arc::clone(session),
            supervisor.config().heartbeat_interval,
            cancel.clone(),
        )),
    ]
}

fn age_seconds(since: Option<DateTime<Utc>>) -> Option<i64> {
    since.map(|ts| Utc::now().signed_duration_since(ts).num_seconds())
}

/// Keepalive/staleness watch.
///
/// While connected this only observes: it logs liveness ages and warns
/// when the heartbeat has gone stale. While *not* connected it proactively
/// routes the session through the reconnection policy, catching closes
/// the event stream never delivered.
pub(crate) async fn run_keepalive(
    supervisor: Arc<Supervisor>,
    session: Arc<Session>,
    cancel: CancellationToken,
) {
    let period = supervisor.config().keepalive_interval;
    let stale_after = supervisor.config().heartbeat_stale_after.as_secs() as i64;
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if session.status() == SessionStatus::Connected {
                    let inbound_age = age_seconds(session.last_inbound_at());
                    let heartbeat_age = age_seconds(session.last_heartbeat_at());
                    log::debug!(
                        "session {}: keepalive (last inbound {:?}s ago, last heartbeat {:?}s ago)",
                        session.id,
                        inbound_age,
                        heartbeat_age
                    );
                    if let Some(age) = heartbeat_age {
                        if age > stale_after {
                            log::warn!(
                                "session {}: still connected but heartbeat is {}s stale",
                                session.id,
                                age
                            );
                        }
                    }
                } else if session.has_persisted_credentials() && !session.is_reconnecting() {
                    log::info!(
                        "session {}: not connected ({}), triggering reconnection check",
                        session.id,
                        session.status()
                    );
                    reconnect::schedule(
                        Arc::clone(&supervisor),
                        Arc::clone(&session),
                        DisconnectReason::ConnectionLost,
                    );
                }
            }
            () = cancel.cancelled() => return,
        }
    }
}

/// Active heartbeat probe.
///
/// While connected, one no-op round trip per tick. Success stamps
/// `last_heartbeat_at`; failure is logged only - the protocol library's
/// own event stream is trusted to surface a real `Closed` eventually.
pub(crate) async fn run_heartbeat(
    session: Arc<Session>,
    period: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if session.status() != SessionStatus::Connected {
                    continue;
                }
                let Some(client) = session.client() else { continue };
                match client.probe().await {
                    Ok(()) => {
                        session.mark_heartbeat();
                        log::debug!("session {}: heartbeat ok", session.id);
                    }
                    Err(err) => {
                        log::warn!("session {}: heartbeat probe failed: {}", session.id, err);
                    }
                }
            }
            () = cancel.cancelled() => return,
        }
    }
}
