//! Mirror error types.

use std::path::PathBuf;

use depotsync_model::ErrorKind;

/// Errors produced while syncing or compacting a mirror.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("mirror changed outside depotsync: {0}")]
    ForeignChange(String),

    #[error("mirror is locked: {}", .0.display())]
    Locked(PathBuf),
}

impl From<MirrorError> for ErrorKind {
    fn from(err: MirrorError) -> Self {
        match err {
            MirrorError::ForeignChange(_) | MirrorError::Locked(_) => {
                ErrorKind::RepoConflict(err.to_string())
            }
            MirrorError::Io(_) | MirrorError::Json(_) | MirrorError::Git { .. } => {
                ErrorKind::Io(err.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
