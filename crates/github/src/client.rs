//! GitHub REST client.
//!
//! Async HTTP client using `reqwest` with optional bearer auth. Holds no
//! quota state; each response's headers drive its own retry decision.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use depotsync_model::{ErrorKind, EventSink, PipelineEvent, RetryPolicy};
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::SEARCH_SOURCE;
use crate::parse;
use crate::ratelimit::{RateLimitSignal, next_link};
use crate::sources::PriorityTable;
use crate::types::{
    CandidateContent, CandidateFile, CandidateLocation, ContentsResponse, RateLimitResponse,
    RateLimitStatus, SearchResponse,
};

const DEFAULT_API_BASE: &str = "https://api.github.com";
const DEFAULT_RAW_BASE: &str = "https://raw.githubusercontent.com";
const API_VERSION: &str = "2022-11-28";

/// Connection and discovery settings for GitHub.
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_base: String,
    pub raw_base: String,
    /// Bearer token. Without one, requests use unauthenticated limits and
    /// code search is skipped.
    pub token: Option<String>,
    pub timeout: Duration,
    /// Results per code search page.
    pub per_page: u32,
    /// Code search pages read per run.
    pub max_pages: u32,
    /// Concurrent candidate downloads.
    pub max_workers: usize,
    /// Total rate-limit waiting accepted for one request before giving up.
    pub rate_limit_timeout: Duration,
    pub search_code: bool,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            raw_base: DEFAULT_RAW_BASE.to_string(),
            token: None,
            timeout: Duration::from_secs(30),
            per_page: 100,
            max_pages: 5,
            max_workers: 8,
            rate_limit_timeout: Duration::from_secs(60),
            search_code: true,
        }
    }
}

/// Why a single request attempt failed.
enum Failure {
    /// Quota exhausted; carries the wait the headers asked for, if any.
    RateLimited(Option<Duration>),
    Transient(ErrorKind),
    Fatal(ErrorKind),
}

/// GitHub client for candidate discovery and download.
pub struct GitHubClient {
    http: reqwest::Client,
    pub(crate) config: GitHubConfig,
    pub(crate) sources: PriorityTable,
    retry: RetryPolicy,
    pub(crate) events: EventSink,
}

impl GitHubClient {
    /// Creates a new client.
    pub fn new(
        config: GitHubConfig,
        sources: PriorityTable,
        retry: RetryPolicy,
    ) -> Result<Self, ErrorKind> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("depotsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ErrorKind::InvalidInput(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            sources,
            retry,
            events: EventSink::disabled(),
        })
    }

    /// Routes retry, rate-limit and discovery events to the given sink.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    pub fn priorities(&self) -> &PriorityTable {
        &self.sources
    }

    /// Returns the core API quota.
    pub async fn rate_limit(&self) -> Result<RateLimitStatus, ErrorKind> {
        let url = format!("{}/rate_limit", self.config.api_base);
        let resp: RateLimitResponse = self.get_json("github", &url).await?;
        Ok(resp.rate)
    }

    /// Downloads and parses a candidate.
    ///
    /// Malformed content fails with `ParseError` for this candidate only.
    pub async fn fetch(&self, file: &CandidateFile) -> Result<CandidateContent, ErrorKind> {
        let body = match &file.location {
            CandidateLocation::Raw(url) => self.get_bytes(&file.source_id, url).await?,
            CandidateLocation::Contents(url) => {
                let contents: ContentsResponse = self.get_json(&file.source_id, url).await?;
                decode_contents(&file.path, &contents)?
            }
        };
        debug!(source = %file.source_id, path = %file.path, bytes = body.len(), "fetched candidate");
        parse::parse_candidate(file.file_name(), &body)
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        source_id: &str,
        url: &str,
    ) -> Result<T, ErrorKind> {
        let body = self.get_bytes(source_id, url).await?;
        serde_json::from_slice(&body).map_err(|e| ErrorKind::ParseError(format!("{url}: {e}")))
    }

    /// Reads a code search page and its `rel="next"` link.
    pub(crate) async fn get_page(
        &self,
        url: &str,
    ) -> Result<(SearchResponse, Option<String>), ErrorKind> {
        let resp = self.get(SEARCH_SOURCE, url).await?;
        let next = next_link(resp.headers());
        let body = resp
            .bytes()
            .await
            .map_err(|e| ErrorKind::UpstreamUnavailable(format!("{url}: {e}")))?;
        let page = serde_json::from_slice(&body)
            .map_err(|e| ErrorKind::ParseError(format!("{url}: {e}")))?;
        Ok((page, next))
    }

    pub(crate) async fn get_bytes(&self, source_id: &str, url: &str) -> Result<Vec<u8>, ErrorKind> {
        let resp = self.get(source_id, url).await?;
        let body = resp
            .bytes()
            .await
            .map_err(|e| ErrorKind::UpstreamUnavailable(format!("{url}: {e}")))?;
        Ok(body.to_vec())
    }

    /// Issues a GET, waiting out rate limits and retrying transient
    /// failures per the retry policy.
    async fn get(&self, source_id: &str, url: &str) -> Result<reqwest::Response, ErrorKind> {
        let mut attempt: u32 = 0;
        let mut waited = Duration::ZERO;

        loop {
            attempt += 1;
            match self.send_once(url).await {
                Ok(resp) => return Ok(resp),
                Err(Failure::Fatal(e)) => return Err(e),
                Err(Failure::RateLimited(requested)) => {
                    let wait = requested.unwrap_or_else(|| self.retry.delay_for_attempt(attempt));
                    if waited + wait > self.config.rate_limit_timeout || !self.retry.should_retry(attempt) {
                        warn!(
                            source = source_id,
                            attempt,
                            wait_secs = wait.as_secs(),
                            waited_secs = waited.as_secs(),
                            "github rate limit not recoverable in time"
                        );
                        return Err(ErrorKind::RateLimited { retry_after: wait });
                    }
                    info!(
                        source = source_id,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "github rate limit hit, waiting"
                    );
                    self.events.emit(PipelineEvent::RateLimitWait {
                        source_id: source_id.to_string(),
                        wait,
                    });
                    tokio::time::sleep(wait).await;
                    waited += wait;
                }
                Err(Failure::Transient(err)) => {
                    if !self.retry.should_retry(attempt) {
                        warn!(source = source_id, attempt, error = %err, "github request gave up");
                        return Err(err);
                    }
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        source = source_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "github request failed, retrying"
                    );
                    self.events.emit(PipelineEvent::Retrying {
                        source_id: source_id.to_string(),
                        attempt,
                        delay,
                        reason: err.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn send_once(&self, url: &str) -> Result<reqwest::Response, Failure> {
        let mut req = self
            .http
            .get(url)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(token) = &self.config.token {
            // The raw host never sees the token.
            if url.starts_with(&self.config.api_base) {
                req = req.bearer_auth(token);
            }
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Failure::Transient(ErrorKind::UpstreamUnavailable(e.to_string())))?;

        let status = resp.status();
        let signal = RateLimitSignal::from_headers(resp.headers());
        if let Some(remaining) = signal.remaining {
            debug!(%url, %status, remaining, "github response");
        }

        if status.is_success() {
            return Ok(resp);
        }
        if signal.is_exhausted(status) {
            return Err(Failure::RateLimited(signal.wait_from(Utc::now().timestamp())));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(Failure::Fatal(ErrorKind::NotFound(url.to_string())));
        }
        if status.is_server_error() {
            return Err(Failure::Transient(ErrorKind::UpstreamUnavailable(format!(
                "github returned {status}"
            ))));
        }
        Err(Failure::Fatal(ErrorKind::UpstreamUnavailable(format!(
            "github returned {status} for {url}"
        ))))
    }
}

fn decode_contents(path: &str, contents: &ContentsResponse) -> Result<Vec<u8>, ErrorKind> {
    if contents.encoding != "base64" {
        return Err(ErrorKind::ParseError(format!(
            "{path}: unsupported content encoding {:?}",
            contents.encoding
        )));
    }
    let cleaned: String = contents
        .content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(cleaned)
        .map_err(|e| ErrorKind::ParseError(format!("{path}: {e}")))
}
