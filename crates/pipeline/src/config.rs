//! Pipeline configuration.
//!
//! Stored as TOML at `$XDG_CONFIG_HOME/depotsync/config.toml` (or
//! `~/.config/depotsync/config.toml`), overridable with `DEPOTSYNC_CONFIG`.
//! Every field has a default, so a partial or missing file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use depotsync_github::{GitHubConfig, PriorityTable, TrustedSource, default_sources};
use depotsync_mirror::{Author, MirrorOptions};
use depotsync_model::{ErrorKind, RetryPolicy};
use depotsync_steam::SteamConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "DEPOTSYNC_CONFIG";
pub const TOKEN_ENV: &str = "GITHUB_API_TOKEN";

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for ErrorKind {
    fn from(err: ConfigError) -> Self {
        ErrorKind::InvalidInput(err.to_string())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Overall run deadline in seconds; 0 disables it.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    #[serde(default)]
    pub steam: SteamSection,

    #[serde(default)]
    pub github: GitHubSection,

    #[serde(default)]
    pub retry: RetrySection,

    /// Trusted source repositories in discovery order.
    #[serde(default = "default_sources")]
    pub sources: Vec<TrustedSource>,

    #[serde(default)]
    pub mirror: MirrorSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteamSection {
    #[serde(default = "default_steam_base")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubSection {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_raw_base")]
    pub raw_base: String,
    /// Falls back to `GITHUB_API_TOKEN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_rate_limit_timeout_secs")]
    pub rate_limit_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub search_code: bool,
    /// Also list the `{dlc_id}` branches of trusted sources that have no
    /// `config.json` for the app.
    #[serde(default = "default_true")]
    pub dlc_branches: bool,
    /// Priority of code search hits outside the trusted sources.
    #[serde(default)]
    pub unlisted_priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub push: bool,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

fn default_deadline_secs() -> u64 {
    300
}

fn default_steam_base() -> String {
    SteamConfig::default().base_url
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_country() -> String {
    "us".into()
}

fn default_language() -> String {
    "english".into()
}

fn default_api_base() -> String {
    GitHubConfig::default().api_base
}

fn default_raw_base() -> String {
    GitHubConfig::default().raw_base
}

fn default_per_page() -> u32 {
    100
}

fn default_max_pages() -> u32 {
    5
}

fn default_max_workers() -> usize {
    8
}

fn default_rate_limit_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_branch() -> String {
    "main".into()
}

fn default_author_name() -> String {
    Author::default().name
}

fn default_author_email() -> String {
    Author::default().email
}

fn default_lock_timeout_secs() -> u64 {
    10
}

impl Default for SteamSection {
    fn default() -> Self {
        Self {
            base_url: default_steam_base(),
            timeout_secs: default_timeout_secs(),
            country: default_country(),
            language: default_language(),
        }
    }
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            raw_base: default_raw_base(),
            token: None,
            timeout_secs: default_timeout_secs(),
            per_page: default_per_page(),
            max_pages: default_max_pages(),
            max_workers: default_max_workers(),
            rate_limit_timeout_secs: default_rate_limit_timeout_secs(),
            search_code: default_true(),
            dlc_branches: default_true(),
            unlisted_priority: 0,
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for MirrorSection {
    fn default() -> Self {
        Self {
            path: None,
            remote_url: None,
            branch: default_branch(),
            push: false,
            author_name: default_author_name(),
            author_email: default_author_email(),
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
            steam: SteamSection::default(),
            github: GitHubSection::default(),
            retry: RetrySection::default(),
            sources: default_sources(),
            mirror: MirrorSection::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads from `DEPOTSYNC_CONFIG` or the default path, falling back to
    /// defaults when the file does not exist. The GitHub token falls back
    /// to `GITHUB_API_TOKEN`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(default_config_path);

        let mut config = match path {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        if config.github.token.is_none() {
            config.github.token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty());
        }
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        for url in [&self.steam.base_url, &self.github.api_base, &self.github.raw_base] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return invalid(format!("not an http(s) URL: {url}"));
            }
        }
        if !(1..=100).contains(&self.github.per_page) {
            return invalid(format!("github.per_page must be 1..=100, got {}", self.github.per_page));
        }
        if self.github.max_workers == 0 {
            return invalid("github.max_workers must be at least 1".into());
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".into());
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return invalid(format!("retry.multiplier must be >= 1.0, got {}", self.retry.multiplier));
        }
        for (i, source) in self.sources.iter().enumerate() {
            let valid = source
                .repo
                .split_once('/')
                .is_some_and(|(owner, name)| !owner.is_empty() && !name.is_empty() && !name.contains('/'));
            if !valid {
                return invalid(format!("sources[{i}]: expected owner/name, got {:?}", source.repo));
            }
            if self.sources[..i]
                .iter()
                .any(|s| s.repo.eq_ignore_ascii_case(&source.repo))
            {
                return invalid(format!("sources[{i}]: duplicate repository {}", source.repo));
            }
        }
        if self.mirror.branch.trim().is_empty() {
            return invalid("mirror.branch must not be empty".into());
        }
        Ok(())
    }

    pub fn deadline(&self) -> Option<Duration> {
        (self.deadline_secs > 0).then(|| Duration::from_secs(self.deadline_secs))
    }

    pub fn steam_config(&self) -> SteamConfig {
        SteamConfig {
            base_url: self.steam.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(self.steam.timeout_secs),
            country: self.steam.country.clone(),
            language: self.steam.language.clone(),
        }
    }

    /// GitHub settings; `token` overrides the configured one.
    pub fn github_config(&self, token: Option<String>) -> GitHubConfig {
        GitHubConfig {
            api_base: self.github.api_base.trim_end_matches('/').to_string(),
            raw_base: self.github.raw_base.trim_end_matches('/').to_string(),
            token: token.or_else(|| self.github.token.clone()),
            timeout: Duration::from_secs(self.github.timeout_secs),
            per_page: self.github.per_page,
            max_pages: self.github.max_pages,
            max_workers: self.github.max_workers,
            rate_limit_timeout: Duration::from_secs(self.github.rate_limit_timeout_secs),
            search_code: self.github.search_code,
        }
    }

    pub fn priority_table(&self) -> PriorityTable {
        PriorityTable::new(self.sources.clone(), self.github.unlisted_priority)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            multiplier: self.retry.multiplier,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            max_attempts: self.retry.max_attempts,
        }
    }

    pub fn mirror_options(&self) -> MirrorOptions {
        MirrorOptions {
            branch: self.mirror.branch.clone(),
            author: Author {
                name: self.mirror.author_name.clone(),
                email: self.mirror.author_email.clone(),
            },
            push: self.mirror.push,
            lock_timeout: Duration::from_secs(self.mirror.lock_timeout_secs),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("depotsync").join("config.toml"))
}

fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}
