//! Datastore collaborator interface.
//!
//! The relational store owns credential blobs and session status rows;
//! this crate only reads and writes them through [`SessionStore`]. All
//! calls from the supervisor are best-effort at the boundary except
//! credential loads during session creation, which degrade to fresh
//! credentials (see [`crate::credentials`]).
//!
//! [`MemoryStore`] is a complete in-process implementation for embedders
//! and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::session::{SessionId, SessionStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("datastore unavailable: {0}")]
    Unavailable(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistence operations the supervisor needs from the datastore.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the stored credential blob for a session, if any.
    async fn load_credential_blob(&self, id: &SessionId) -> Result<Option<Vec<u8>>, StoreError>;

    /// Upsert the credential blob for a session.
    async fn save_credential_blob(&self, id: &SessionId, blob: &[u8]) -> Result<(), StoreError>;

    /// Persist the connection status row for a session.
    async fn update_session_status(
        &self,
        id: &SessionId,
        status: SessionStatus,
    ) -> Result<(), StoreError>;

    /// Ids of all sessions that have a stored credential blob. Used by the
    /// startup bulk-reconnect sweep.
    async fn list_sessions_with_credentials(&self) -> Result<Vec<SessionId>, StoreError>;
}

/// In-memory [`SessionStore`].
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<SessionId, Vec<u8>>>,
    statuses: Mutex<HashMap<SessionId, SessionStatus>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last persisted status for a session, if any.
    pub fn status(&self, id: &SessionId) -> Option<SessionStatus> {
        self.statuses.lock().unwrap().get(id).copied()
    }

    /// Seed a credential blob, e.g. to simulate a previously paired device.
    pub fn put_blob(&self, id: &SessionId, blob: Vec<u8>) {
        self.blobs.lock().unwrap().insert(id.clone(), blob);
    }

    pub fn blob(&self, id: &SessionId) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load_credential_blob(&self, id: &SessionId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.lock().unwrap().get(id).cloned())
    }

    async fn save_credential_blob(&self, id: &SessionId, blob: &[u8]) -> Result<(), StoreError> {
        self.blobs.lock().unwrap().insert(id.clone(), blob.to_vec());
        Ok(())
    }

    async fn update_session_status(
        &self,
        id: &SessionId,
        status: SessionStatus,
    ) -> Result<(), StoreError> {
        self.statuses.lock().unwrap().insert(id.clone(), status);
        Ok(())
    }

    async fn list_sessions_with_credentials(&self) -> Result<Vec<SessionId>, StoreError> {
        Ok(self.blobs.lock().unwrap().keys().cloned().collect())
    }
}
