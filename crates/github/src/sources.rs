//! Trusted source repositories and their priorities.

use serde::{Deserialize, Serialize};

/// A repository that publishes one branch per app id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedSource {
    /// `owner/name`.
    pub repo: String,
    pub priority: i32,
}

impl TrustedSource {
    pub fn new(repo: impl Into<String>, priority: i32) -> Self {
        Self {
            repo: repo.into(),
            priority,
        }
    }
}

/// Built-in sources used when the configuration names none.
pub fn default_sources() -> Vec<TrustedSource> {
    vec![
        TrustedSource::new("a-herta/manifest", 10),
        TrustedSource::new("SteamAutoCracks/ManifestHub", 5),
    ]
}

/// Priority lookup for candidate sources.
///
/// Repository names compare case-insensitively, as GitHub treats them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityTable {
    sources: Vec<TrustedSource>,
    unlisted_priority: i32,
}

impl PriorityTable {
    pub fn new(sources: Vec<TrustedSource>, unlisted_priority: i32) -> Self {
        Self {
            sources,
            unlisted_priority,
        }
    }

    /// Trusted sources in discovery order.
    pub fn sources(&self) -> &[TrustedSource] {
        &self.sources
    }

    fn lookup(&self, repo: &str) -> Option<&TrustedSource> {
        self.sources.iter().find(|s| s.repo.eq_ignore_ascii_case(repo))
    }

    pub fn priority_of(&self, repo: &str) -> i32 {
        self.lookup(repo).map_or(self.unlisted_priority, |s| s.priority)
    }

    /// Canonical source id: the configured spelling for trusted repos, the
    /// reported name otherwise.
    pub fn source_id(&self, repo: &str) -> String {
        self.lookup(repo).map_or_else(|| repo.to_string(), |s| s.repo.clone())
    }
}

impl Default for PriorityTable {
    fn default() -> Self {
        Self::new(default_sources(), 0)
    }
}
