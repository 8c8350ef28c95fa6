//! Durable session persistence.
//!
//! A minimal key→record store behind a trait, so a database-backed
//! implementation can replace the file-backed one without touching the
//! loop controller. The file store keeps one pretty-printed JSON record per
//! session, human-auditable, and every write goes through a temp file plus
//! atomic rename: a concurrent reader sees either the old or the new
//! record, never a mix.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::errors::{MedicError, MedicResult};
use crate::session::Session;

/// Durable key→record store for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist the full session record.
    async fn save(&self, session: &Session) -> MedicResult<()>;

    /// Load a session by id, `None` if it was never stored.
    async fn load(&self, id: &str) -> MedicResult<Option<Session>>;
}

/// Session ids are embedded in file names; reject anything that could
/// escape the store directory.
pub fn validate_session_id(id: &str) -> MedicResult<()> {
    let ok = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(MedicError::validation(format!(
            "invalid session id: {id:?}"
        )))
    }
}

/// File-backed store: one `<id>.json` per session.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Create a store rooted at `dir`. The directory is created lazily on
    /// first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the session records.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_file(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn storage_err(&self, reason: impl std::fmt::Display) -> MedicError {
        MedicError::Storage {
            path: self.dir.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, session: &Session) -> MedicResult<()> {
        validate_session_id(&session.id)?;

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.storage_err(format!("failed to create session directory: {e}")))?;

        let content = serde_json::to_string_pretty(session)?;

        // Temp file lives in the same directory so the rename stays on one
        // filesystem and is atomic.
        let path = self.session_file(&session.id);
        let tmp = self.dir.join(format!(".{}.json.tmp", session.id));
        fs::write(&tmp, &content)
            .await
            .map_err(|e| self.storage_err(format!("failed to write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| self.storage_err(format!("failed to rename into {}: {e}", path.display())))?;

        debug!(session_id = %session.id, path = %path.display(), "Persisted session");
        Ok(())
    }

    async fn load(&self, id: &str) -> MedicResult<Option<Session>> {
        validate_session_id(id)?;

        let path = self.session_file(id);
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let session: Session = serde_json::from_str(&content)?;
                Ok(Some(session))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.storage_err(format!("failed to read {}: {e}", path.display()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ExecutionMode, Session, SessionStatus};

    #[tokio::test]
    async fn save_then_load_round_trips_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());

        let mut session = Session::new("pod stuck pending", None, ExecutionMode::Manual);
        session.final_analysis = Some("PVC missing".to_string());
        session.advance(SessionStatus::AnalysisComplete).unwrap();

        store.save(&session).await.unwrap();
        let loaded = store.load(&session.id).await.unwrap().unwrap();

        assert_eq!(
            serde_json::to_string(&session).unwrap(),
            serde_json::to_string(&loaded).unwrap()
        );
    }

    #[tokio::test]
    async fn load_of_unknown_id_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        assert!(store.load("med-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_replaces_prior_record_without_leaving_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());

        let mut session = Session::new("first", None, ExecutionMode::Manual);
        store.save(&session).await.unwrap();
        session.final_analysis = Some("second".to_string());
        store.save(&session).await.unwrap();

        let loaded = store.load(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.final_analysis.as_deref(), Some("second"));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[tokio::test]
    async fn path_traversal_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let err = store.load("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, MedicError::Validation { .. }));
    }
}
