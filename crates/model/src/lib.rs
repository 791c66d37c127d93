//! Shared types for the depotsync pipeline.
//!
//! Every crate in the workspace speaks in terms of these types: the
//! Steam and GitHub clients produce them, the reconciler consumes them,
//! and the orchestrator reports them back to the caller.

pub mod error;
pub mod events;
pub mod retry;
pub mod types;

// Re-export primary types for convenience.
pub use error::{ErrorKind, SourceError};
pub use events::{EventSink, PipelineEvent, Stage};
pub use retry::RetryPolicy;
pub use types::{AppId, AppMetadata, CandidateSet, DepotEntry, FrozenCandidates, ResolvedManifest};

/// Source id used for errors and events that belong to the run itself.
pub const PIPELINE_SOURCE: &str = "pipeline";

/// Source id used by the Steam metadata client.
pub const STEAM_SOURCE: &str = "steam";
