//! GitHub candidate sources for depotsync.
//!
//! Discovers depot manifest, key and config files for an app in trusted
//! branch-per-app repositories and, optionally, through code search.
//! Downloads them with bounded concurrency and turns them into depot
//! entries.

pub mod client;
pub mod collector;
pub mod discovery;
pub mod parse;
pub mod ratelimit;
pub mod sources;
pub mod types;
pub mod vdf;

pub use client::{GitHubClient, GitHubConfig};
pub use collector::{CandidateCollector, GatherOutcome};
pub use sources::{PriorityTable, TrustedSource, default_sources};
pub use types::{CandidateContent, CandidateFile, CandidateLocation, ManifestClaim, RateLimitStatus};

/// Source id for errors raised by code search itself.
pub const SEARCH_SOURCE: &str = "github-search";
