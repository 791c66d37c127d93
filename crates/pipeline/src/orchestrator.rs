//! Run orchestration.
//!
//! Steam metadata and GitHub gathering run concurrently. Once both finish,
//! the DLC branches of trusted sources that shipped no `config.json` are
//! gathered for the DLC ids Steam reported. The candidates are then
//! reconciled and, when a mirror is configured, synced on a blocking
//! thread. A deadline or cancellation stops network work early; whatever
//! was gathered is still reconciled but not synced.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::pin::pin;
use std::time::Duration;

use depotsync_github::{
    CandidateCollector, GatherOutcome, GitHubClient, RateLimitStatus, TrustedSource,
};
use depotsync_mirror::{RepoSyncState, SyncContext, SyncOutcome};
use depotsync_model::{
    AppId, AppMetadata, ErrorKind, EventSink, PIPELINE_SOURCE, PipelineEvent, ResolvedManifest,
    STEAM_SOURCE, SourceError, Stage,
};
use depotsync_steam::SteamClient;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;

/// Inputs for one run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub app_id: i64,
    /// Overrides the configured token.
    pub github_token: Option<String>,
    /// Overrides the configured mirror path.
    pub mirror_path: Option<PathBuf>,
    /// Overrides the configured deadline.
    pub deadline: Option<Duration>,
}

impl RunRequest {
    pub fn new(app_id: i64) -> Self {
        Self {
            app_id,
            ..Default::default()
        }
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No errors.
    Success,
    /// Some sources failed; the rest of the run completed.
    Partial,
    /// A run-scoped error stopped the run.
    Failed,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub app_id: i64,
    pub resolved: ResolvedManifest,
    pub errors: Vec<SourceError>,
    pub status: RunStatus,
    pub final_stage: Stage,
    pub metadata: Option<AppMetadata>,
    /// DLC ids reported by Steam and by source `config.json` files.
    pub dlc_ids: Vec<u32>,
    pub sync: Option<SyncOutcome>,
}

/// Stage and error bookkeeping for one run.
struct RunLog<'a> {
    events: &'a EventSink,
    stage: Stage,
    errors: Vec<SourceError>,
}

impl<'a> RunLog<'a> {
    fn new(events: &'a EventSink) -> Self {
        Self {
            events,
            stage: Stage::Idle,
            errors: Vec::new(),
        }
    }

    fn enter(&mut self, stage: Stage) {
        info!(from = ?self.stage, to = ?stage, "stage changed");
        self.stage = stage;
        self.events.emit(PipelineEvent::StageChanged { stage });
    }

    fn record(&mut self, err: SourceError) {
        warn!(source = %err.source_id, error = %err.kind, "error recorded");
        self.events.emit(PipelineEvent::ErrorRecorded(err.clone()));
        self.errors.push(err);
    }

    fn has_fatal(&self) -> bool {
        self.errors.iter().any(|e| e.kind.is_fatal())
    }
}

/// Runs the depotsync pipeline.
pub struct Orchestrator {
    config: PipelineConfig,
    events: EventSink,
    events_rx: Option<mpsc::UnboundedReceiver<PipelineEvent>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Creates an orchestrator after validating `config`.
    pub fn new(config: PipelineConfig) -> Result<Self, ErrorKind> {
        config.validate()?;
        let (events, events_rx) = EventSink::channel();
        Ok(Self {
            config,
            events,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        })
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<PipelineEvent>> {
        self.events_rx.take()
    }

    /// Returns a token that stops runs in progress.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Resolves and syncs the depot manifests of one app.
    pub async fn run(&self, request: RunRequest) -> PipelineResult {
        let mut log = RunLog::new(&self.events);
        let mut result = PipelineResult {
            app_id: request.app_id,
            resolved: ResolvedManifest::default(),
            errors: Vec::new(),
            status: RunStatus::Failed,
            final_stage: Stage::Idle,
            metadata: None,
            dlc_ids: Vec::new(),
            sync: None,
        };

        let app_id = match AppId::new(request.app_id) {
            Ok(id) => id,
            Err(e) => {
                log.record(SourceError::new(PIPELINE_SOURCE, e));
                return finish(log, result);
            }
        };
        let (steam, github) = match self.clients(&request) {
            Ok(clients) => clients,
            Err(e) => {
                log.record(SourceError::new(PIPELINE_SOURCE, e));
                return finish(log, result);
            }
        };
        info!(app_id = %app_id, "run started");

        let deadline = request
            .deadline
            .or_else(|| self.config.deadline())
            .map(|d| Instant::now() + d);
        let mut collector = CandidateCollector::new();

        let mut expired = pin!(async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        });

        log.enter(Stage::ResolvingMetadata);
        let mut interrupted = {
            let mut metadata_fut = pin!(steam.resolve(request.app_id));
            let mut gather = pin!(github.gather(app_id));
            log.enter(Stage::GatheringCandidates);

            let mut steam_done = false;
            let mut gather_done = false;
            loop {
                if steam_done && gather_done {
                    break None;
                }
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break Some(ErrorKind::Cancelled),
                    _ = &mut expired => break Some(ErrorKind::DeadlineExceeded),
                    metadata = &mut metadata_fut, if !steam_done => {
                        steam_done = true;
                        match metadata {
                            Ok(meta) => {
                                info!(app_id = %app_id, name = %meta.name, "steam metadata resolved");
                                result.metadata = Some(meta);
                            }
                            Err(e) => log.record(SourceError::new(STEAM_SOURCE, e)),
                        }
                    }
                    outcome = gather.next(), if !gather_done => match outcome {
                        Some(GatherOutcome::Fetched { file, content }) => collector.accept(&file, content),
                        Some(GatherOutcome::Failed(e)) => log.record(e),
                        None => gather_done = true,
                    },
                }
            }
        };

        let (dlcs, sources) = self.dlc_branches(&collector, result.metadata.as_ref());
        if interrupted.is_none() && !dlcs.is_empty() && !sources.is_empty() {
            info!(app_id = %app_id, dlcs = dlcs.len(), sources = sources.len(), "gathering dlc branches");
            let mut gather = pin!(github.gather_dlc(dlcs, sources));
            interrupted = loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break Some(ErrorKind::Cancelled),
                    _ = &mut expired => break Some(ErrorKind::DeadlineExceeded),
                    outcome = gather.next() => match outcome {
                        Some(GatherOutcome::Fetched { file, content }) => collector.accept_dlc(&file, content),
                        Some(GatherOutcome::Failed(e)) => log.record(e),
                        None => break None,
                    },
                }
            };
        }

        let mut dlc_ids: BTreeSet<u32> = collector.dlc_ids().clone();
        if let Some(meta) = &result.metadata {
            dlc_ids.extend(meta.dlc_ids.iter().copied());
        }
        result.dlc_ids = dlc_ids.iter().copied().collect();
        let app_name = match &result.metadata {
            Some(meta) => Some(meta.name.clone()),
            None => collector.app_name().map(str::to_string),
        };

        log.enter(Stage::Reconciling);
        let candidates = collector.into_candidates().freeze();
        result.resolved = depotsync_reconcile::reconcile(&candidates);
        self.events.emit(PipelineEvent::Reconciled {
            candidates: candidates.len(),
            depots: result.resolved.len(),
        });
        info!(
            app_id = %app_id,
            candidates = candidates.len(),
            depots = result.resolved.len(),
            "reconciled"
        );

        if let Some(kind) = interrupted {
            self.events.emit(PipelineEvent::SyncSkipped {
                reason: kind.to_string(),
            });
            log.record(SourceError::new(PIPELINE_SOURCE, kind));
            return finish(log, result);
        }

        let mirror_path = request.mirror_path.or_else(|| self.config.mirror.path.clone());
        match mirror_path {
            None => self.events.emit(PipelineEvent::SyncSkipped {
                reason: "no mirror configured".into(),
            }),
            Some(_) if result.resolved.is_empty() => self.events.emit(PipelineEvent::SyncSkipped {
                reason: "no depots resolved".into(),
            }),
            Some(path) => {
                log.enter(Stage::Syncing);
                let ctx = SyncContext {
                    app_id,
                    app_name,
                    dlc_ids,
                    inherit_script_metadata: result.metadata.is_none(),
                    options: self.config.mirror_options(),
                };
                match self.sync(path, result.resolved.clone(), ctx).await {
                    Ok(outcome) => {
                        match &outcome.commit {
                            Some(commit) => self.events.emit(PipelineEvent::Committed {
                                commit: commit.clone(),
                                depots: outcome.depots.clone(),
                            }),
                            None => self.events.emit(PipelineEvent::SyncUnchanged),
                        }
                        result.sync = Some(outcome);
                    }
                    Err(e) => log.record(SourceError::new(PIPELINE_SOURCE, e)),
                }
            }
        }

        finish(log, result)
    }

    /// Squashes the mirror's history into one commit.
    pub async fn compact(&self, mirror_path: Option<PathBuf>) -> Result<Option<SyncOutcome>, ErrorKind> {
        let path = mirror_path
            .or_else(|| self.config.mirror.path.clone())
            .ok_or_else(|| ErrorKind::InvalidInput("no mirror path configured".into()))?;
        let remote = self.config.mirror.remote_url.clone();
        let options = self.config.mirror_options();

        tokio::task::spawn_blocking(move || {
            let state = RepoSyncState::load(&path, remote)?;
            depotsync_mirror::compact(&state, &options)
        })
        .await
        .map_err(|e| ErrorKind::Io(format!("compact task failed: {e}")))?
        .map_err(ErrorKind::from)
    }

    /// Reports the GitHub core API quota for the given or configured token.
    pub async fn github_quota(&self, token: Option<String>) -> Result<RateLimitStatus, ErrorKind> {
        let github = GitHubClient::new(
            self.config.github_config(token),
            self.config.priority_table(),
            self.config.retry_policy(),
        )?;
        github.rate_limit().await
    }

    /// DLC ids to look up and the trusted sources to look in. Empty unless
    /// DLC branches are enabled and Steam reported DLCs.
    fn dlc_branches(
        &self,
        collector: &CandidateCollector,
        metadata: Option<&AppMetadata>,
    ) -> (Vec<u32>, Vec<TrustedSource>) {
        let Some(meta) = metadata.filter(|_| self.config.github.dlc_branches) else {
            return Default::default();
        };
        let sources = self
            .config
            .priority_table()
            .sources()
            .iter()
            .filter(|source| !collector.has_app_config(&source.repo))
            .cloned()
            .collect();
        (meta.dlc_ids.clone(), sources)
    }

    fn clients(&self, request: &RunRequest) -> Result<(SteamClient, GitHubClient), ErrorKind> {
        let retry = self.config.retry_policy();
        let steam = SteamClient::new(self.config.steam_config(), retry.clone())?
            .with_events(self.events.clone());
        let github = GitHubClient::new(
            self.config.github_config(request.github_token.clone()),
            self.config.priority_table(),
            retry,
        )?
        .with_events(self.events.clone());
        Ok((steam, github))
    }

    async fn sync(
        &self,
        path: PathBuf,
        resolved: ResolvedManifest,
        ctx: SyncContext,
    ) -> Result<SyncOutcome, ErrorKind> {
        let remote = self.config.mirror.remote_url.clone();
        tokio::task::spawn_blocking(move || {
            let state = RepoSyncState::load(&path, remote)?;
            depotsync_mirror::sync(&resolved, &state, &ctx)
        })
        .await
        .map_err(|e| ErrorKind::Io(format!("sync task failed: {e}")))?
        .map_err(ErrorKind::from)
    }
}

fn finish(mut log: RunLog<'_>, mut result: PipelineResult) -> PipelineResult {
    let status = if log.has_fatal() {
        RunStatus::Failed
    } else if log.errors.is_empty() {
        RunStatus::Success
    } else {
        RunStatus::Partial
    };

    if status == RunStatus::Failed {
        log.enter(Stage::Failed);
        error!(app_id = result.app_id, errors = log.errors.len(), "run failed");
    } else {
        log.enter(Stage::Done);
        info!(app_id = result.app_id, ?status, depots = result.resolved.len(), "run finished");
    }

    result.status = status;
    result.final_stage = log.stage;
    result.errors = log.errors;
    result
}
