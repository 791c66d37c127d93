//! depotsync pipeline.
//!
//! Ties the Steam metadata client, GitHub candidate discovery, manifest
//! reconciliation and the git mirror into a single cancellable run with
//! an overall deadline. Progress is reported as [`PipelineEvent`]s.
//!
//! [`PipelineEvent`]: depotsync_model::PipelineEvent

pub mod config;
pub mod orchestrator;

pub use config::{ConfigError, PipelineConfig};
pub use orchestrator::{Orchestrator, PipelineResult, RunRequest, RunStatus};
