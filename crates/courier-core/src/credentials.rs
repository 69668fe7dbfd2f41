//! Credential persistence adapter.
//!
//! Translates between the protocol library's in-memory credential material
//! and the opaque blob the datastore keeps per session. The core never
//! interprets the material itself - it only frames it in a JSON envelope
//! (`creds` + `keys`) so a stored blob can be told apart from garbage.
//!
//! Load failures of any kind fall back to fresh empty credentials: a
//! missing blob means a brand-new pairing, and a corrupt blob is treated
//! the same way (with a warning, since it may indicate datastore
//! corruption). Save failures are logged and swallowed - at worst the next
//! reconnect re-authenticates from slightly stale state.

use serde::{Deserialize, Serialize};

use crate::session::SessionId;
use crate::store::SessionStore;

/// Serialized identity/session key material, as produced by the protocol
/// library. `creds` and `keys` are opaque JSON documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialState {
    #[serde(default)]
    pub creds: serde_json::Value,
    #[serde(default)]
    pub keys: serde_json::Value,
}

impl CredentialState {
    /// Freshly initialized empty credentials, signalling a new pairing.
    pub fn fresh() -> Self {
        Self::default()
    }

    pub fn is_fresh(&self) -> bool {
        self.creds.is_null() && self.keys.is_null()
    }
}

/// Load credentials for a session.
///
/// Returns the credential state plus whether a persisted blob actually
/// backed it (`false` means the session is a brand-new pairing).
pub async fn load(store: &dyn SessionStore, id: &SessionId) -> (CredentialState, bool) {
    let blob = match store.load_credential_blob(id).await {
        Ok(blob) => blob,
        Err(err) => {
            log::warn!("session {}: credential load failed: {}", id, err);
            return (CredentialState::fresh(), false);
        }
    };

    let Some(blob) = blob else {
        return (CredentialState::fresh(), false);
    };

    match serde_json::from_slice::<CredentialState>(&blob) {
        Ok(state) => (state, true),
        Err(err) => {
            log::warn!(
                "session {}: stored credential blob is unreadable ({}), starting a fresh pairing",
                id,
                err
            );
            (CredentialState::fresh(), false)
        }
    }
}

/// Serialize and upsert the credential blob for a session.
///
/// Returns whether the save actually landed; failures are logged, never
/// raised.
pub async fn save(store: &dyn SessionStore, id: &SessionId, state: &CredentialState) -> bool {
    let blob = match serde_json::to_vec(state) {
        Ok(blob) => blob,
        Err(err) => {
            log::warn!("session {}: credential serialization failed: {}", id, err);
            return false;
        }
    };

    match store.save_credential_blob(id, &blob).await {
        Ok(()) => true,
        Err(err) => {
            log::warn!("session {}: credential save failed: {}", id, err);
            false
        }
    }
}
