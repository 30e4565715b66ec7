use crate::session::Session;
use askr_core::{AskrError, AskrResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A conversation persisted between runs as one JSON document.
///
/// A missing file is an empty history. Parent directories are created on
/// the first save.
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    /// History stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Where the history lives.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The saved session, or `None` when nothing was saved yet.
    pub async fn load(&self) -> AskrResult<Option<Session>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no saved session, starting fresh");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let session: Session = serde_json::from_str(&data).map_err(|e| {
            AskrError::Config(format!(
                "session file '{}' is not a saved askr session: {e}",
                self.path.display()
            ))
        })?;
        info!(
            path = %self.path.display(),
            session_id = %session.id,
            turns = session.message_count(),
            "resuming saved session"
        );
        Ok(Some(session))
    }

    /// Replace the saved history with `session`.
    pub async fn save(&self, session: &Session) -> AskrResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&self.path, json).await?;
        debug!(
            path = %self.path.display(),
            turns = session.message_count(),
            "session saved"
        );
        Ok(())
    }
}
