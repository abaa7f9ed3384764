//! In-process session store.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::traits::{validate_session_id, SessionStore};
use crate::errors::RemediateResult;
use crate::session::InvestigationSession;

/// Session store kept in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, InvestigationSession>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> RemediateResult<Option<InvestigationSession>> {
        validate_session_id(id)?;
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn save(&self, session: &InvestigationSession) -> RemediateResult<()> {
        validate_session_id(&session.id)?;
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }
}
