//! File-based session storage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::traits::{validate_session_id, SessionStore};
use crate::errors::{RemediateError, RemediateResult};
use crate::session::InvestigationSession;

/// File-based session store: one `<id>.json` per session.
///
/// Writes go to `<id>.json.tmp` and are renamed into place, so a crash
/// mid-write leaves the previous version intact.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    /// Directory holding session files
    sessions_dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(sessions_dir: impl AsRef<Path>) -> Self {
        Self {
            sessions_dir: sessions_dir.as_ref().to_path_buf(),
        }
    }

    /// Get the sessions directory path
    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{id}.json"))
    }

    async fn write_atomic(&self, path: &Path, contents: &str) -> RemediateResult<()> {
        fs::create_dir_all(&self.sessions_dir)
            .await
            .map_err(|e| RemediateError::FileWriteError {
                path: self.sessions_dir.display().to_string(),
                reason: e.to_string(),
            })?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, contents)
            .await
            .map_err(|e| RemediateError::FileWriteError {
                path: tmp_path.display().to_string(),
                reason: e.to_string(),
            })?;
        fs::rename(&tmp_path, path)
            .await
            .map_err(|e| RemediateError::FileWriteError {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, id: &str) -> RemediateResult<Option<InvestigationSession>> {
        validate_session_id(id)?;
        let path = self.session_path(id);
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let session: InvestigationSession =
                    serde_json::from_str(&content).map_err(|e| RemediateError::JsonParseError {
                        reason: format!("{}: {e}", path.display()),
                    })?;
                debug!(
                    "Loaded session {id} ({} iterations, {})",
                    session.iterations.len(),
                    session.status
                );
                Ok(Some(session))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RemediateError::FileReadError {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn save(&self, session: &InvestigationSession) -> RemediateResult<()> {
        validate_session_id(&session.id)?;
        let mut content = serde_json::to_string_pretty(session)?;
        content.push('\n');
        self.write_atomic(&self.session_path(&session.id), &content)
            .await?;
        debug!("Saved session {} ({})", session.id, session.status);
        Ok(())
    }
}
