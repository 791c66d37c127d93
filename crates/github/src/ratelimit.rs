//! Rate-limit signals read from GitHub response headers.
//!
//! Every decision is derived from the response at hand; nothing is
//! remembered between requests.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};

const REMAINING: &str = "x-ratelimit-remaining";
const RESET: &str = "x-ratelimit-reset";

/// Quota headers of a single response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitSignal {
    pub remaining: Option<u64>,
    /// Unix timestamp of the next reset.
    pub reset_at: Option<i64>,
    pub retry_after: Option<Duration>,
}

impl RateLimitSignal {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            remaining: header_num(headers, REMAINING),
            reset_at: header_num(headers, RESET),
            retry_after: header_num::<u64>(headers, RETRY_AFTER.as_str()).map(Duration::from_secs),
        }
    }

    /// Returns true if a response with this status and these headers means
    /// the quota is exhausted (primary or secondary limit).
    pub fn is_exhausted(&self, status: StatusCode) -> bool {
        match status {
            StatusCode::TOO_MANY_REQUESTS => true,
            StatusCode::FORBIDDEN => self.remaining == Some(0) || self.retry_after.is_some(),
            _ => false,
        }
    }

    /// How long the headers ask us to wait, measured from `now` (Unix
    /// seconds). `retry-after` wins over the reset timestamp.
    pub fn wait_from(&self, now: i64) -> Option<Duration> {
        if let Some(wait) = self.retry_after {
            return Some(wait);
        }
        match (self.remaining, self.reset_at) {
            (Some(0), Some(reset)) => Some(Duration::from_secs(reset.saturating_sub(now).max(0) as u64)),
            _ => None,
        }
    }
}

fn header_num<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Extracts the `rel="next"` target from a `Link` header.
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(reqwest::header::LINK)?.to_str().ok()?;
    value.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if !params.split(';').any(|p| p.trim() == r#"rel="next""#) {
            return None;
        }
        target
            .trim()
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}
