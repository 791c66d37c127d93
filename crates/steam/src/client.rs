//! Steam store API client.
//!
//! Async HTTP client using `reqwest`. Stateless between calls.

use std::collections::HashMap;
use std::time::Duration;

use depotsync_model::{AppId, AppMetadata, ErrorKind, EventSink, PipelineEvent, RetryPolicy, STEAM_SOURCE};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::types::AppDetailsEnvelope;

const DEFAULT_BASE_URL: &str = "https://store.steampowered.com/api";

/// Connection settings for the Steam store API.
#[derive(Debug, Clone)]
pub struct SteamConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Store region (`cc` query parameter).
    pub country: String,
    /// Store language (`l` query parameter).
    pub language: String,
}

impl Default for SteamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            country: "us".into(),
            language: "english".into(),
        }
    }
}

/// Outcome of a single request attempt.
enum Attempt {
    /// Transient failure; eligible for another attempt.
    Retry(ErrorKind),
    /// Permanent failure.
    Fail(ErrorKind),
}

/// Steam store metadata client.
pub struct SteamClient {
    http: reqwest::Client,
    config: SteamConfig,
    retry: RetryPolicy,
    events: EventSink,
}

impl SteamClient {
    /// Creates a new client.
    pub fn new(config: SteamConfig, retry: RetryPolicy) -> Result<Self, ErrorKind> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("depotsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ErrorKind::InvalidInput(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            retry,
            events: EventSink::disabled(),
        })
    }

    /// Routes retry events to the given sink.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Resolves an app id to its store metadata.
    ///
    /// Non-positive ids fail with `InvalidInput` before any request is
    /// made. Throttling, 5xx responses and transport errors are retried
    /// per the retry policy and then reported as `UpstreamUnavailable`.
    pub async fn resolve(&self, app_id: i64) -> Result<AppMetadata, ErrorKind> {
        let app_id = AppId::new(app_id)?;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let err = match self.request_once(app_id).await {
                Ok(meta) => return Ok(meta),
                Err(Attempt::Fail(e)) => return Err(e),
                Err(Attempt::Retry(e)) => e,
            };

            if !self.retry.should_retry(attempt) {
                warn!(app_id = %app_id, attempt, error = %err, "steam metadata request gave up");
                return Err(match err {
                    ErrorKind::RateLimited { .. } => {
                        ErrorKind::UpstreamUnavailable("steam store is throttling requests".into())
                    }
                    other => other,
                });
            }

            let delay = self.retry.delay_for_attempt(attempt);
            warn!(
                app_id = %app_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "steam metadata request failed, retrying"
            );
            self.events.emit(PipelineEvent::Retrying {
                source_id: STEAM_SOURCE.into(),
                attempt,
                delay,
                reason: err.to_string(),
            });
            tokio::time::sleep(delay).await;
        }
    }

    /// Performs one `appdetails` request and classifies the outcome.
    async fn request_once(&self, app_id: AppId) -> Result<AppMetadata, Attempt> {
        let url = format!("{}/appdetails", self.config.base_url);
        let id = app_id.to_string();
        debug!(%url, app_id = %app_id, "requesting steam app details");

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("appids", id.as_str()),
                ("cc", self.config.country.as_str()),
                ("l", self.config.language.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Attempt::Retry(ErrorKind::UpstreamUnavailable(e.to_string())))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Attempt::Fail(ErrorKind::NotFound(format!("steam app {app_id}"))));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Attempt::Retry(ErrorKind::RateLimited {
                retry_after: retry_after_header(&resp).unwrap_or_default(),
            }));
        }
        if status.is_server_error() {
            return Err(Attempt::Retry(ErrorKind::UpstreamUnavailable(format!(
                "steam returned {status}"
            ))));
        }
        if !status.is_success() {
            return Err(Attempt::Fail(ErrorKind::UpstreamUnavailable(format!(
                "steam returned {status}"
            ))));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| Attempt::Retry(ErrorKind::UpstreamUnavailable(e.to_string())))?;
        parse_app_details(app_id, &body).map_err(Attempt::Fail)
    }
}

/// Parses an `appdetails` body keyed by the requested app id.
fn parse_app_details(app_id: AppId, body: &[u8]) -> Result<AppMetadata, ErrorKind> {
    let mut envelopes: HashMap<String, AppDetailsEnvelope> = serde_json::from_slice(body)
        .map_err(|e| ErrorKind::ParseError(format!("steam app details: {e}")))?;

    let envelope = envelopes
        .remove(&app_id.to_string())
        .ok_or_else(|| ErrorKind::NotFound(format!("steam app {app_id}")))?;

    match envelope {
        AppDetailsEnvelope {
            success: true,
            data: Some(data),
        } => Ok(AppMetadata {
            app_id,
            depot_ids: data.depot_ids(),
            name: data.name,
            app_type: data.app_type,
            dlc_ids: data.dlc,
        }),
        _ => Err(ErrorKind::NotFound(format!("steam app {app_id}"))),
    }
}

fn retry_after_header(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Starts a mock HTTP server that answers successive connections with
    /// the given `(status, body)` pairs. Returns the base URL and a counter
    /// of requests served.
    async fn mock_server(
        responses: Vec<(u16, &str)>,
    ) -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let served = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&served);
        let responses: Vec<(u16, String)> =
            responses.into_iter().map(|(s, b)| (s, b.to_string())).collect();

        let handle = tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = vec![0u8; 8192];
                let _ = stream.read(&mut buf).await;
                counter.fetch_add(1, Ordering::SeqCst);

                let resp = format!(
                    "HTTP/1.1 {status} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (url, served, handle)
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(5),
            multiplier: 2.0,
            max_delay: Duration::from_millis(20),
            max_attempts,
        }
    }

    fn client(url: String, retry: RetryPolicy) -> SteamClient {
        let config = SteamConfig {
            base_url: url,
            timeout: Duration::from_secs(5),
            ..Default::default()
        };
        SteamClient::new(config, retry).unwrap()
    }

    const SPACEWAR: &str =
        r#"{"480":{"success":true,"data":{"name":"Spacewar","type":"game","dlc":[110902]}}}"#;

    #[tokio::test]
    async fn resolve_returns_metadata() {
        let (url, served, handle) = mock_server(vec![(200, SPACEWAR)]).await;

        let meta = client(url, fast_retry(3)).resolve(480).await.unwrap();
        assert_eq!(meta.app_id.get(), 480);
        assert_eq!(meta.name, "Spacewar");
        assert_eq!(meta.app_type, "game");
        assert_eq!(meta.dlc_ids, vec![110902]);
        assert_eq!(served.load(Ordering::SeqCst), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn resolve_rejects_invalid_id_without_request() {
        let (url, served, handle) = mock_server(vec![(200, SPACEWAR)]).await;

        let err = client(url, fast_retry(3)).resolve(0).await.unwrap_err();
        assert!(matches!(err, ErrorKind::InvalidInput(_)));
        let err = client("http://127.0.0.1:9".into(), fast_retry(3))
            .resolve(-5)
            .await
            .unwrap_err();
        assert!(matches!(err, ErrorKind::InvalidInput(_)));
        assert_eq!(served.load(Ordering::SeqCst), 0);

        handle.abort();
    }

    #[tokio::test]
    async fn resolve_404_is_not_found() {
        let (url, served, handle) = mock_server(vec![(404, "{}")]).await;

        let err = client(url, fast_retry(3)).resolve(480).await.unwrap_err();
        assert!(matches!(err, ErrorKind::NotFound(_)));
        assert_eq!(served.load(Ordering::SeqCst), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn resolve_unsuccessful_body_is_not_found() {
        let (url, _, handle) = mock_server(vec![(200, r#"{"480":{"success":false}}"#)]).await;

        let err = client(url, fast_retry(3)).resolve(480).await.unwrap_err();
        assert!(matches!(err, ErrorKind::NotFound(_)));

        handle.abort();
    }

    #[tokio::test]
    async fn resolve_retries_server_errors_then_succeeds() {
        let (url, served, handle) =
            mock_server(vec![(503, "{}"), (429, "{}"), (200, SPACEWAR)]).await;
        let (sink, mut rx) = EventSink::channel();

        let meta = client(url, fast_retry(5))
            .with_events(sink)
            .resolve(480)
            .await
            .unwrap();
        assert_eq!(meta.name, "Spacewar");
        assert_eq!(served.load(Ordering::SeqCst), 3);

        let mut retries = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::Retrying { attempt, .. } = event {
                retries.push(attempt);
            }
        }
        assert_eq!(retries, vec![1, 2]);

        handle.abort();
    }

    #[tokio::test]
    async fn resolve_gives_up_after_attempt_ceiling() {
        let (url, served, handle) =
            mock_server(vec![(500, "{}"), (502, "{}"), (429, "{}"), (200, SPACEWAR)]).await;

        let err = client(url, fast_retry(3)).resolve(480).await.unwrap_err();
        assert!(matches!(err, ErrorKind::UpstreamUnavailable(_)));
        assert_eq!(served.load(Ordering::SeqCst), 3);

        handle.abort();
    }

    #[tokio::test]
    async fn resolve_client_error_is_not_retried() {
        let (url, served, handle) = mock_server(vec![(400, "{}"), (200, SPACEWAR)]).await;

        let err = client(url, fast_retry(5)).resolve(480).await.unwrap_err();
        assert!(matches!(err, ErrorKind::UpstreamUnavailable(_)));
        assert_eq!(served.load(Ordering::SeqCst), 1);

        handle.abort();
    }

    #[test]
    fn parse_malformed_body() {
        let err = parse_app_details(AppId::new(480).unwrap(), b"<html>").unwrap_err();
        assert!(matches!(err, ErrorKind::ParseError(_)));
    }

    #[test]
    fn parse_missing_app_key() {
        let err = parse_app_details(AppId::new(480).unwrap(), br#"{"730":{"success":true}}"#)
            .unwrap_err();
        assert!(matches!(err, ErrorKind::NotFound(_)));
    }
}
