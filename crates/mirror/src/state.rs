//! Persisted sync state of a mirror.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

pub const STATE_FILE: &str = "depotsync-state.json";

/// What depotsync last did to a mirror. Stored inside its git directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSyncState {
    pub local_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_commit: Option<String>,
}

impl RepoSyncState {
    pub fn new(local_path: impl Into<PathBuf>, remote_url: Option<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_url,
            last_synced_commit: None,
        }
    }

    fn file(local_path: &Path) -> PathBuf {
        local_path.join(".git").join(STATE_FILE)
    }

    /// Loads the state of the mirror at `local_path`, or a fresh state if
    /// none was saved. A configured `remote_url` overrides the stored one.
    pub fn load(local_path: &Path, remote_url: Option<String>) -> Result<Self> {
        let path = Self::file(local_path);
        if !path.exists() {
            return Ok(Self::new(local_path, remote_url));
        }
        let data = std::fs::read_to_string(&path)?;
        let mut state: Self = serde_json::from_str(&data)?;
        debug!(path = %path.display(), commit = ?state.last_synced_commit, "loaded mirror state");
        state.local_path = local_path.to_path_buf();
        if remote_url.is_some() {
            state.remote_url = remote_url;
        }
        Ok(state)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::file(&self.local_path);
        let json = serde_json::to_string_pretty(self)?;
        crate::layout::write_atomic(&path, json.as_bytes())?;
        debug!(path = %path.display(), commit = ?self.last_synced_commit, "saved mirror state");
        Ok(())
    }
}
