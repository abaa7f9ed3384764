//! Session store trait.

use async_trait::async_trait;

use crate::errors::{RemediateError, RemediateResult};
use crate::session::InvestigationSession;

/// Durable, atomically-updated session persistence.
///
/// Sessions are loaded and saved around every step; nothing is shared
/// between calls except what the store holds.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session by id. `Ok(None)` when it does not exist.
    async fn load(&self, id: &str) -> RemediateResult<Option<InvestigationSession>>;

    /// Persist a session, replacing any previous version atomically.
    async fn save(&self, session: &InvestigationSession) -> RemediateResult<()>;

    /// Load a session that must exist.
    async fn require(&self, id: &str) -> RemediateResult<InvestigationSession> {
        self.load(id)
            .await?
            .ok_or_else(|| RemediateError::SessionNotFound { id: id.to_string() })
    }
}

/// Session ids are used as file names, so only a safe alphabet is accepted.
pub fn validate_session_id(id: &str) -> RemediateResult<()> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RemediateError::InvalidSessionId { id: id.to_string() })
    }
}
