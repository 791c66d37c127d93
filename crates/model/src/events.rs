//! Structured event stream emitted while a pipeline run progresses.
//!
//! The core never formats text for display; callers take the receiving
//! end of the channel and render events however they like.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::SourceError;

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    ResolvingMetadata,
    GatheringCandidates,
    Reconciling,
    Syncing,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Events emitted during a run, in the order they happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The run moved to a new stage.
    StageChanged { stage: Stage },
    /// A request failed transiently and will be retried after `delay`.
    Retrying {
        source_id: String,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    /// A worker is suspended until the GitHub quota resets.
    RateLimitWait { source_id: String, wait: Duration },
    /// A trusted source has no branch for the requested app.
    SourceEmpty { source_id: String },
    /// A candidate file was discovered.
    CandidateFound { source_id: String, path: String },
    /// A candidate file was downloaded and parsed.
    CandidateAccepted { source_id: String, path: String },
    /// An error was recorded against a source or the run.
    ErrorRecorded(SourceError),
    /// Reconciliation finished.
    Reconciled { candidates: usize, depots: usize },
    /// The mirror received a new commit.
    Committed { commit: String, depots: Vec<u32> },
    /// Syncing ran but nothing changed.
    SyncUnchanged,
    /// Syncing was not attempted.
    SyncSkipped { reason: String },
}

/// Cloneable sending half of the event stream.
///
/// Sending never blocks and never fails: once the receiver is gone,
/// events are dropped silently.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl EventSink {
    /// Creates a sink together with its receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
