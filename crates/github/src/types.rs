//! GitHub REST payloads and the candidate types built from them.

use chrono::{DateTime, Utc};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// API responses
// ---------------------------------------------------------------------------

/// `GET /repos/{repo}/branches/{branch}`.
#[derive(Debug, Deserialize)]
pub(crate) struct BranchResponse {
    pub commit: BranchCommit,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BranchCommit {
    pub sha: String,
    pub commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommitDetail {
    pub committer: Option<Signature>,
    pub tree: TreeRef,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Signature {
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TreeRef {
    pub url: String,
}

/// `GET {tree.url}?recursive=1`.
#[derive(Debug, Deserialize)]
pub(crate) struct TreeResponse {
    pub tree: Vec<TreeEntry>,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// `GET /search/code`.
#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub incomplete_results: bool,
    #[serde(default)]
    pub items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchItem {
    pub name: String,
    pub path: String,
    /// Contents API URL for the file.
    pub url: String,
    pub repository: SearchRepository,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchRepository {
    pub full_name: String,
}

/// `GET /repos/{repo}/contents/{path}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ContentsResponse {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub encoding: String,
}

/// `GET /rate_limit`.
#[derive(Debug, Deserialize)]
pub(crate) struct RateLimitResponse {
    pub rate: RateLimitStatus,
}

/// Core API quota as reported by `/rate_limit`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub remaining: u64,
    /// Unix timestamp of the next reset.
    pub reset: i64,
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// Where a candidate's bytes are downloaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateLocation {
    /// Plain body from the raw-content host.
    Raw(String),
    /// Contents API URL returning a base64 body.
    Contents(String),
}

/// A file discovered in a source that may carry depot data.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFile {
    /// Repository full name (`owner/name`).
    pub source_id: String,
    pub source_priority: i32,
    /// Path inside the repository.
    pub path: String,
    pub location: CandidateLocation,
    /// Commit time for branch candidates. Search hits carry none and rank
    /// as oldest.
    pub observed_at: Option<DateTime<Utc>>,
}

impl CandidateFile {
    /// Final path component.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// A `{depot}_{manifest}.manifest` file whose payload checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestClaim {
    pub depot_id: u32,
    pub manifest_id: u64,
}

/// Parsed content of a candidate file.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateContent {
    Manifest(ManifestClaim),
    /// Depot decryption keys from `key.vdf`.
    DepotKeys(Vec<(u32, Vec<u8>)>),
    /// DLC lists from `config.json`.
    AppConfig { dlcs: Vec<u32>, package_dlcs: Vec<u32> },
    /// App name from `appinfo.vdf`.
    AppInfo { name: String },
}
