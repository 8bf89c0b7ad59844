use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::research::ResearchSession;

/// Keeps the single active research session on disk between commands.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SessionStore { path: path.into() }
    }

    pub fn from_config() -> Self {
        SessionStore::new(CONFIG.session_path.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty session. An unreadable one is an error so
    /// a corrupt file is never silently overwritten.
    pub async fn load(&self) -> Result<ResearchSession> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No session file at {}, starting fresh", self.path.display());
                return Ok(ResearchSession::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Could not read {}", self.path.display()))
            }
        };
        if raw.trim().is_empty() {
            return Ok(ResearchSession::default());
        }
        serde_json::from_str(&raw).with_context(|| {
            format!(
                "Session file {} is not valid; run `reset` to start over",
                self.path.display()
            )
        })
    }

    /// Writes through a sibling temp file and renames it into place, so a
    /// reader never sees a half-written session.
    pub async fn save(&self, session: &ResearchSession) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Could not create {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(session)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("Could not write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Could not replace {}", self.path.display()))?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                warn!("Could not remove {}: {}", self.path.display(), err);
                Err(err.into())
            }
        }
    }
}
