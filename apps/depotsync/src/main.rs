//! depotsync command line entry point.

mod cli;

use std::process::ExitCode;

use depotsync_model::PipelineEvent;
use depotsync_pipeline::{Orchestrator, PipelineConfig, PipelineResult, RunRequest, RunStatus};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

use crate::cli::Command;

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let command = match cli::parse(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("error: {e:#}\n{}", cli::USAGE);
            return Ok(ExitCode::from(64));
        }
    };

    let config = PipelineConfig::load()?;
    tracing::debug!(sources = config.sources.len(), "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(execute(config, command))
}

async fn execute(config: PipelineConfig, command: Command) -> anyhow::Result<ExitCode> {
    let mut orchestrator = Orchestrator::new(config)?;

    match command {
        Command::Quota { token } => {
            let quota = orchestrator.github_quota(token).await?;
            println!("{}/{} requests left, resets at {}", quota.remaining, quota.limit, quota.reset);
            Ok(ExitCode::SUCCESS)
        }
        Command::Compact { mirror } => {
            match orchestrator.compact(mirror).await? {
                Some(outcome) => tracing::info!(
                    commit = outcome.commit.as_deref().unwrap_or_default(),
                    pushed = outcome.pushed,
                    "mirror compacted"
                ),
                None => tracing::info!("mirror has no history to compact"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            app_id,
            token,
            mirror,
            deadline,
            json,
        } => {
            match orchestrator.github_quota(token.clone()).await {
                Ok(quota) => tracing::info!(
                    remaining = quota.remaining,
                    limit = quota.limit,
                    "github quota"
                ),
                Err(e) => tracing::warn!(error = %e, "could not read github quota"),
            }

            if let Some(rx) = orchestrator.take_events() {
                tokio::spawn(log_events(rx));
            }
            let cancel = orchestrator.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("SIGINT received, cancelling run");
                    cancel.cancel();
                }
            });

            let result = orchestrator
                .run(RunRequest {
                    app_id,
                    github_token: token,
                    mirror_path: mirror,
                    deadline,
                })
                .await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_summary(&result);
            }
            Ok(match result.status {
                RunStatus::Success => ExitCode::SUCCESS,
                RunStatus::Partial => ExitCode::from(2),
                RunStatus::Failed => ExitCode::FAILURE,
            })
        }
    }
}

/// Renders pipeline events as log lines.
async fn log_events(mut rx: UnboundedReceiver<PipelineEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::StageChanged { stage } => tracing::debug!(?stage, "stage"),
            PipelineEvent::Retrying {
                source_id,
                attempt,
                delay,
                reason,
            } => tracing::info!(%source_id, attempt, ?delay, %reason, "retrying"),
            PipelineEvent::RateLimitWait { source_id, wait } => {
                tracing::info!(%source_id, ?wait, "waiting for rate limit")
            }
            PipelineEvent::SourceEmpty { source_id } => {
                tracing::info!(%source_id, "source has nothing for this app")
            }
            PipelineEvent::CandidateFound { source_id, path } => {
                tracing::debug!(%source_id, %path, "candidate found")
            }
            PipelineEvent::CandidateAccepted { source_id, path } => {
                tracing::debug!(%source_id, %path, "candidate accepted")
            }
            PipelineEvent::ErrorRecorded(_) => {}
            PipelineEvent::Reconciled { candidates, depots } => {
                tracing::info!(candidates, depots, "reconciled")
            }
            PipelineEvent::Committed { commit, depots } => {
                tracing::info!(%commit, ?depots, "mirror updated")
            }
            PipelineEvent::SyncUnchanged => tracing::info!("mirror already up to date"),
            PipelineEvent::SyncSkipped { reason } => tracing::info!(%reason, "sync skipped"),
        }
    }
}

fn print_summary(result: &PipelineResult) {
    let name = result
        .metadata
        .as_ref()
        .map(|m| m.name.as_str())
        .unwrap_or("unknown");
    println!("app {} ({name}): {:?}", result.app_id, result.status);
    for entry in result.resolved.iter() {
        println!(
            "  depot {:>10}  manifest {:>20}  key {}  from {}",
            entry.depot_id,
            entry.manifest_id,
            if entry.decryption_key.is_some() { "yes" } else { "no " },
            entry.source_id
        );
    }
    for err in &result.errors {
        println!("  error [{}]: {}", err.source_id, err.kind);
    }
    if let Some(commit) = result.sync.as_ref().and_then(|s| s.commit.as_deref()) {
        println!("  committed {commit}");
    }
}
