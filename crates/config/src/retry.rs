//! Retry and throttle configuration.
//!
//! [`RetryConfig`] controls how often transient failures are retried and
//! how long the client backs off between attempts. [`ThrottleConfig`]
//! controls the reaction to GitHub's primary and secondary rate limits.
//!
//! The retry count has no default on purpose: whoever bootstraps the client
//! (application or test harness) must state it.

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Upper bound for `retry.retries`.
pub const MAX_RETRIES: u32 = 10;

/// Default base delay for exponential backoff (1 second).
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Default ceiling for exponential backoff (30 seconds).
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Upper bound for any backoff setting (10 minutes).
pub const MAX_DELAY_MS: u64 = 600_000;

/// Status codes that are never retried unless they carry a rate-limit marker.
pub const DEFAULT_DO_NOT_RETRY: &[&str] = &["400", "401", "403", "404", "410", "422", "451"];

/// Default wait for a primary rate limit without usable headers (1 minute).
pub const DEFAULT_RATE_LIMIT_BACKOFF_SECS: u64 = 60;

/// Default fixed wait for a secondary rate limit (1 minute).
pub const DEFAULT_SECONDARY_BACKOFF_SECS: u64 = 60;

/// Default longest rate-limit wait the client accepts (15 minutes).
pub const DEFAULT_MAX_WAIT_SECS: u64 = 900;

/// Upper bound for rate-limit wait settings (2 hours).
pub const MAX_WAIT_SECS: u64 = 7_200;

/// Retry settings for outbound calls.
///
/// # Examples
///
/// ```
/// use contribmatch_config::RetryConfig;
///
/// let retry = RetryConfig::new(3);
/// assert_eq!(retry.retries, 3);
/// assert!(retry.do_not_retry_codes().unwrap().contains(&404));
///
/// // The retry count is required in config files
/// assert!(serde_json::from_str::<RetryConfig>("{}").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub retries: u32,

    /// Status codes (as strings, e.g. `"404"`) that are never retried.
    #[serde(default = "default_do_not_retry")]
    pub do_not_retry: Vec<String>,

    /// Delay before the first retry, doubled on each further retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Ceiling for the exponential delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Whether to add random jitter to exponential delays.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_do_not_retry() -> Vec<String> {
    DEFAULT_DO_NOT_RETRY.iter().map(|s| (*s).to_string()).collect()
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

fn default_jitter() -> bool {
    true
}

impl RetryConfig {
    /// Creates a retry configuration with the given retry count and default
    /// backoff settings.
    #[must_use]
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            do_not_retry: default_do_not_retry(),
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter: true,
        }
    }

    /// Replaces the backoff window.
    #[must_use]
    pub fn with_backoff(mut self, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Disables jitter, making delays fully deterministic.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Replaces the do-not-retry list.
    #[must_use]
    pub fn with_do_not_retry<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.do_not_retry = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Parses the do-not-retry list into status codes.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry is not an HTTP status code (100-599).
    pub fn do_not_retry_codes(&self) -> Result<Vec<u16>> {
        self.do_not_retry
            .iter()
            .map(|raw| {
                raw.trim()
                    .parse::<u16>()
                    .ok()
                    .filter(|code| (100..=599).contains(code))
                    .ok_or_else(|| ConfigError::InvalidValue {
                        field: "retry.do_not_retry",
                        reason: format!("'{raw}' is not an HTTP status code"),
                    })
            })
            .collect()
    }

    /// Validates the retry configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is outside its accepted range.
    pub fn validate(&self) -> Result<()> {
        check_range("retry.retries", u64::from(self.retries), 0, u64::from(MAX_RETRIES))?;
        check_range("retry.base_delay_ms", self.base_delay_ms, 1, MAX_DELAY_MS)?;
        check_range(
            "retry.max_delay_ms",
            self.max_delay_ms,
            self.base_delay_ms,
            MAX_DELAY_MS,
        )?;
        self.do_not_retry_codes()?;
        Ok(())
    }
}

/// Reaction to GitHub rate limits.
///
/// # Examples
///
/// ```
/// use contribmatch_config::ThrottleConfig;
///
/// let throttle = ThrottleConfig::default();
/// assert!(throttle.enabled);
/// assert_eq!(throttle.secondary_backoff_secs, 60);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThrottleConfig {
    /// Whether rate-limited calls are retried after waiting.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Wait applied to a primary rate limit when neither `Retry-After` nor
    /// `X-RateLimit-Reset` is usable.
    #[serde(default = "default_rate_limit_backoff_secs")]
    pub default_backoff_secs: u64,

    /// Fixed wait applied to a secondary rate limit without `Retry-After`.
    #[serde(default = "default_secondary_backoff_secs")]
    pub secondary_backoff_secs: u64,

    /// Rate-limit waits longer than this give up instead of sleeping.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    /// How many times a single call may retry after a secondary rate limit.
    #[serde(default = "default_max_secondary_retries")]
    pub max_secondary_retries: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_rate_limit_backoff_secs() -> u64 {
    DEFAULT_RATE_LIMIT_BACKOFF_SECS
}

fn default_secondary_backoff_secs() -> u64 {
    DEFAULT_SECONDARY_BACKOFF_SECS
}

fn default_max_wait_secs() -> u64 {
    DEFAULT_MAX_WAIT_SECS
}

fn default_max_secondary_retries() -> u32 {
    1
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_backoff_secs: DEFAULT_RATE_LIMIT_BACKOFF_SECS,
            secondary_backoff_secs: DEFAULT_SECONDARY_BACKOFF_SECS,
            max_wait_secs: DEFAULT_MAX_WAIT_SECS,
            max_secondary_retries: 1,
        }
    }
}

impl ThrottleConfig {
    /// Creates a throttle configuration that never waits on rate limits.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Validates the throttle configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is outside its accepted range.
    pub fn validate(&self) -> Result<()> {
        check_range("throttle.default_backoff_secs", self.default_backoff_secs, 1, MAX_WAIT_SECS)?;
        check_range(
            "throttle.secondary_backoff_secs",
            self.secondary_backoff_secs,
            1,
            MAX_WAIT_SECS,
        )?;
        check_range("throttle.max_wait_secs", self.max_wait_secs, 1, MAX_WAIT_SECS)?;
        check_range(
            "throttle.max_secondary_retries",
            u64::from(self.max_secondary_retries),
            0,
            u64::from(MAX_RETRIES),
        )?;
        Ok(())
    }
}

pub(crate) fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}
