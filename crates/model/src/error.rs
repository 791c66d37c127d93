//! Error taxonomy shared by every pipeline stage.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Classified failure produced anywhere in the pipeline.
///
/// The variant decides how far an error propagates: source-scoped kinds
/// are recorded and the run continues, run-scoped kinds fail the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("repository conflict: {0}")]
    RepoConflict(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(String),
}

impl ErrorKind {
    /// Returns true for errors that fail the whole run rather than a
    /// single source or candidate.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::RepoConflict(_)
                | Self::DeadlineExceeded
                | Self::Cancelled
                | Self::Io(_)
        )
    }

    /// Returns true for transient upstream failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::UpstreamUnavailable(_))
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// An error attributed to the source (repository, Steam, or the run
/// itself) that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{source_id}: {kind}")]
pub struct SourceError {
    pub source_id: String,
    pub kind: ErrorKind,
}

impl SourceError {
    pub fn new(source_id: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(ErrorKind::InvalidInput("x".into()).is_fatal());
        assert!(ErrorKind::DeadlineExceeded.is_fatal());
        assert!(ErrorKind::RepoConflict("dirty".into()).is_fatal());
        assert!(!ErrorKind::NotFound("480".into()).is_fatal());
        assert!(!ErrorKind::ParseError("bad".into()).is_fatal());
        assert!(
            !ErrorKind::RateLimited {
                retry_after: Duration::from_secs(1)
            }
            .is_fatal()
        );
    }

    #[test]
    fn retryable_classification() {
        assert!(ErrorKind::UpstreamUnavailable("503".into()).is_retryable());
        assert!(
            ErrorKind::RateLimited {
                retry_after: Duration::ZERO
            }
            .is_retryable()
        );
        assert!(!ErrorKind::NotFound("480".into()).is_retryable());
    }

    #[test]
    fn source_error_display() {
        let err = SourceError::new("a-herta/manifest", ErrorKind::ParseError("empty".into()));
        assert_eq!(err.to_string(), "a-herta/manifest: parse error: empty");
    }

    #[test]
    fn error_kind_serde_tagged() {
        let json = serde_json::to_string(&ErrorKind::NotFound("480".into())).unwrap();
        assert_eq!(json, r#"{"kind":"not_found","detail":"480"}"#);
        let parsed: ErrorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ErrorKind::NotFound("480".into()));
    }
}
