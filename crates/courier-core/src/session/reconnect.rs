//! Reconnection policy engine.
//!
//! Eligibility is a pure decision over the session's counters plus the
//! disconnect reason; the delay schedule is a coarse step function rather
//! than exponential backoff. The first attempts fire quickly to ride out
//! transient network blips, then the rate caps at one attempt per 30s
//! until the hard attempt cap (roughly a ten-minute total window).

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use super::state::{Session, SessionStatus};
use super::supervisor::{Supervisor, SupervisorError};
use crate::protocol::DisconnectReason;

/// Hard cap on consecutive reconnection attempts. A session that exhausts
/// the cap stays registered as `disconnected` until a manual reconnect.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 30;

/// Whether a session is eligible for an automatic reconnection attempt.
///
/// Rules, in order, first failure short-circuits:
/// 1. credentials must be persisted (a brand-new pairing waits for a QR
///    scan instead),
/// 2. no reconnection attempt may already be in flight,
/// 3. the attempt counter must be below [`MAX_RECONNECT_ATTEMPTS`],
/// 4. the disconnect reason must not be terminal.
pub fn should_reconnect(session: &Session, reason: DisconnectReason) -> bool {
    if !session.has_persisted_credentials() {
        return false;
    }
    if session.is_reconnecting() {
        return false;
    }
    if session.reconnect_attempts() >= MAX_RECONNECT_ATTEMPTS {
        return false;
    }
    !reason.is_terminal()
}

/// Backoff delay before the given attempt (1-based).
pub fn delay_for_attempt(attempt: u32) -> Duration {
    match attempt {
        0 | 1 => Duration::from_secs(3),
        2..=5 => Duration::from_secs(5),
        6..=15 => Duration::from_secs(10),
        _ => Duration::from_secs(30),
    }
}

/// Schedule a reconnection attempt if the session is eligible.
///
/// On acceptance this claims the reconnecting guard, increments the
/// attempt counter, and spawns a detached task that sleeps for the
/// scheduled delay and then re-creates the session. The task is not
/// cancelled on teardown; at expiry it checks that the session is still
/// the one registered, so a stale expiry is a no-op.
///
/// Returns whether an attempt was scheduled.
pub(crate) fn schedule(
    supervisor: Arc<Supervisor>,
    session: Arc<Session>,
    reason: DisconnectReason,
) -> bool {
    if !should_reconnect(&session, reason) {
        return false;
    }
    if !session.begin_reconnect() {
        return false;
    }

    let attempt = session.claim_attempt();
    let delay = delay_for_attempt(attempt);
    log::info!(
        "session {}: scheduling reconnect attempt {} in {:?} (reason: {})",
        session.id,
        attempt,
        delay,
        reason
    );

    tokio::spawn(async move {
        sleep(delay).await;

        // The session may have been removed while the timer was pending;
        // a removed (or replaced) session must stay that way.
        let still_registered = supervisor
            .get(&session.id)
            .map(|current| Arc::ptr_eq(&current, &session))
            .unwrap_or(false);
        if !still_registered {
            log::debug!(
                "session {}: reconnect attempt {} dropped, session was removed",
                session.id,
                attempt
            );
            return;
        }

        match supervisor.create_session(session.id.clone()).await {
            // The attempt is complete once the transport reopens. Clear
            // the guard here rather than waiting for `Open`: if the new
            // connection dies before opening, the next natural close must
            // be able to schedule the next attempt.
            Ok(_) => session.clear_reconnecting(),
            Err(SupervisorError::AlreadyCreating(_)) => {
                // Someone else is already bringing the session up.
                log::debug!(
                    "session {}: reconnect attempt {} skipped, creation already in flight",
                    session.id,
                    attempt
                );
                session.clear_reconnecting();
            }
            Err(err) => {
                log::warn!(
                    "session {}: reconnect attempt {} failed: {}",
                    session.id,
                    attempt,
                    err
                );
                session.clear_reconnecting();
                session.set_status(SessionStatus::Disconnected);
                supervisor
                    .persist_and_emit_status(&session, SessionStatus::Disconnected)
                    .await;
            }
        }
    });

    true
}
