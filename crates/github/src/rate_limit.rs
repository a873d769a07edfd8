//! Rate-limit header parsing and tracking.
//!
//! GitHub reports quota state on every response through
//! `X-RateLimit-Limit`, `X-RateLimit-Remaining`, `X-RateLimit-Used`,
//! `X-RateLimit-Reset`, and `X-RateLimit-Resource`. When a call is throttled
//! the response is a 403 or 429 that is either:
//!
//! - a **primary** limit: the quota for the resource is exhausted
//!   (`X-RateLimit-Remaining: 0`), or
//! - a **secondary** limit: abuse detection kicked in, signalled by the
//!   error message mentioning a secondary rate limit.
//!
//! State is kept per resource for the lifetime of the process only.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

use crate::transport::ApiResponse;

/// Resource assumed when a response omits `X-RateLimit-Resource`.
pub const DEFAULT_RESOURCE: &str = "core";

/// Which GitHub throttle a response hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitKind {
    /// The hourly quota for the resource is used up.
    Primary,
    /// Abuse detection throttled a burst of requests.
    Secondary,
}

/// What a throttled response said about when to come back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDetail {
    pub kind: RateLimitKind,
    /// Parsed `Retry-After` header.
    pub retry_after: Option<Duration>,
    /// Parsed `X-RateLimit-Reset` header.
    pub reset_at: Option<DateTime<Utc>>,
}

/// Quota state of one resource as last reported by GitHub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitState {
    pub resource: String,
    pub limit: u64,
    pub remaining: u64,
    pub used: u64,
    pub reset: DateTime<Utc>,
}

impl RateLimitState {
    /// Reads the state from response headers.
    ///
    /// Returns `None` unless limit, remaining, and reset are all present.
    #[must_use]
    pub fn from_response(response: &ApiResponse) -> Option<Self> {
        let limit = parse_u64(response.header("x-ratelimit-limit"))?;
        let remaining = parse_u64(response.header("x-ratelimit-remaining"))?;
        let reset = parse_reset(response)?;
        let used = parse_u64(response.header("x-ratelimit-used"))
            .unwrap_or_else(|| limit.saturating_sub(remaining));
        let resource = response
            .header("x-ratelimit-resource")
            .unwrap_or(DEFAULT_RESOURCE)
            .to_string();

        Some(Self {
            resource,
            limit,
            remaining,
            used,
            reset,
        })
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

/// Decides whether a response is a rate-limit rejection, and of which kind.
///
/// `message` is the error message extracted from the response body.
#[must_use]
pub fn detect(response: &ApiResponse, message: &str) -> Option<RateLimitDetail> {
    if !matches!(response.status, 403 | 429) {
        return None;
    }

    let lowered = message.to_ascii_lowercase();
    let kind = if lowered.contains("secondary rate limit") || lowered.contains("abuse detection")
    {
        RateLimitKind::Secondary
    } else if parse_u64(response.header("x-ratelimit-remaining")) == Some(0) {
        RateLimitKind::Primary
    } else {
        return None;
    };

    Some(RateLimitDetail {
        kind,
        retry_after: parse_retry_after(response),
        reset_at: parse_reset(response),
    })
}

/// Parses `Retry-After` as delta-seconds or an HTTP date.
#[must_use]
pub fn parse_retry_after(response: &ApiResponse) -> Option<Duration> {
    let raw = response.header("retry-after")?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?;
    (at.with_timezone(&Utc) - Utc::now()).to_std().ok()
}

fn parse_reset(response: &ApiResponse) -> Option<DateTime<Utc>> {
    let epoch = parse_u64(response.header("x-ratelimit-reset"))?;
    Utc.timestamp_opt(i64::try_from(epoch).ok()?, 0).single()
}

fn parse_u64(raw: Option<&str>) -> Option<u64> {
    raw?.trim().parse().ok()
}

/// Last reported quota state for every resource seen so far.
#[derive(Debug, Default)]
pub struct RateLimitTracker {
    states: Mutex<HashMap<String, RateLimitState>>,
}

impl RateLimitTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the state carried by a response, if any.
    pub fn observe(&self, response: &ApiResponse) {
        let Some(state) = RateLimitState::from_response(response) else {
            return;
        };
        debug!(
            resource = %state.resource,
            remaining = state.remaining,
            limit = state.limit,
            "rate limit state updated"
        );
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(state.resource.clone(), state);
    }

    /// Returns the state of one resource.
    #[must_use]
    pub fn get(&self, resource: &str) -> Option<RateLimitState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
            .cloned()
    }

    /// Returns every tracked state, sorted by resource name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RateLimitState> {
        let mut states: Vec<_> = self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        states.sort_by(|a, b| a.resource.cmp(&b.resource));
        states
    }
}
