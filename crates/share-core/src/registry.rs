//! Single-flight guard for edit sessions.
//!
//! At most one session may hold a working copy at a time. Sessions are
//! keyed by [`FileIdentity::session_key`], so every remote spelling of
//! one staged file competes for the same entry. The check
//! and the insert happen under one lock; the [`SessionGuard`] removes the
//! entry when dropped, so every exit path releases it.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::error::ShareError;
use crate::formats::local_name;
use crate::session::SessionState;
use crate::store::FileIdentity;

#[derive(Debug, Clone)]
pub struct SessionMarker {
    pub id: Uuid,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionMarker>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `file` for a new session, or fail with `AlreadyOpen`.
    pub fn try_acquire(self: &Arc<Self>, file: &FileIdentity) -> Result<SessionGuard, ShareError> {
        let identity = file.session_key();
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions.contains_key(&identity) {
            return Err(ShareError::AlreadyOpen(local_name(&file.name).to_string()));
        }

        let id = Uuid::new_v4();
        sessions.insert(
            identity.clone(),
            SessionMarker {
                id,
                state: SessionState::Idle,
                started_at: Utc::now(),
            },
        );
        debug!("Session {} acquired {}", id, identity);

        Ok(SessionGuard {
            registry: Arc::clone(self),
            identity,
            id,
        })
    }

    pub fn state_of(&self, identity: &str) -> Option<SessionState> {
        self.marker(identity).map(|marker| marker.state)
    }

    pub fn marker(&self, identity: &str) -> Option<SessionMarker> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .cloned()
    }

    /// Identities with a live session, sorted.
    pub fn active(&self) -> Vec<String> {
        let mut identities: Vec<_> = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        identities.sort();
        identities
    }

    fn update(&self, identity: &str, id: Uuid, state: SessionState) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(marker) = sessions.get_mut(identity).filter(|m| m.id == id) {
            marker.state = state;
        }
    }

    fn release(&self, identity: &str, id: Uuid) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions.get(identity).is_some_and(|m| m.id == id) {
            sessions.remove(identity);
            debug!("Session {} released {}", id, identity);
        }
    }
}

/// Proof of ownership of one working copy.
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    identity: String,
    id: Uuid,
}

impl SessionGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn set_state(&self, state: SessionState) {
        self.registry.update(&self.identity, self.id, state);
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.release(&self.identity, self.id);
    }
}
