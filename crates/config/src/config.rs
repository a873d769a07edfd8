//! Core client configuration and loading logic.
//!
//! This module provides [`ClientConfig`], which aggregates every option the
//! GitHub client accepts, and [`CacheConfig`] for the response cache.

use serde::Deserialize;

use crate::auth::AuthConfig;
use crate::error::{ConfigError, Result};
use crate::persistence::{find_config_file, read_config_file};
use crate::retry::{RetryConfig, ThrottleConfig, check_range};

/// Default REST/GraphQL endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// Default `User-Agent` header value.
pub const DEFAULT_USER_AGENT: &str = concat!("contribmatch/", env!("CARGO_PKG_VERSION"));

/// Default per-call timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Upper bound for `timeout_secs`.
pub const MAX_TIMEOUT_SECS: u64 = 300;

/// Default cache TTL in seconds (5 minutes).
pub const DEFAULT_CACHE_MAX_AGE: u64 = 300;

/// Upper bound for `cache.max_age` (1 day).
pub const MAX_CACHE_MAX_AGE: u64 = 86_400;

/// Default number of cached responses.
pub const DEFAULT_CACHE_MAX_SIZE: usize = 1_000;

/// Upper bound for `cache.max_size`.
pub const MAX_CACHE_MAX_SIZE: usize = 100_000;

/// Response cache settings.
///
/// # Examples
///
/// ```
/// use contribmatch_config::CacheConfig;
///
/// let cache = CacheConfig::new(300, 10);
/// assert!(cache.validate().is_ok());
/// assert!(CacheConfig::new(0, 10).validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Default TTL of cached responses, in seconds.
    #[serde(default = "default_max_age")]
    pub max_age: u64,

    /// Maximum number of cached responses before LRU eviction.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

fn default_max_age() -> u64 {
    DEFAULT_CACHE_MAX_AGE
}

fn default_max_size() -> usize {
    DEFAULT_CACHE_MAX_SIZE
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_CACHE_MAX_AGE,
            max_size: DEFAULT_CACHE_MAX_SIZE,
        }
    }
}

impl CacheConfig {
    /// Creates a cache configuration.
    #[must_use]
    pub fn new(max_age: u64, max_size: usize) -> Self {
        Self { max_age, max_size }
    }

    /// Validates the cache configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is outside its accepted range.
    pub fn validate(&self) -> Result<()> {
        check_range("cache.max_age", self.max_age, 1, MAX_CACHE_MAX_AGE)?;
        check_range(
            "cache.max_size",
            self.max_size as u64,
            1,
            MAX_CACHE_MAX_SIZE as u64,
        )?;
        Ok(())
    }
}

/// Everything the GitHub client needs to be constructed.
///
/// The struct is not `Clone`: it owns the credentials, and the client takes
/// it by value.
///
/// # Examples
///
/// ```
/// use contribmatch_config::{AuthConfig, CacheConfig, ClientConfig, RetryConfig};
///
/// let config = ClientConfig::new(AuthConfig::token("t"), RetryConfig::new(0))
///     .with_cache(CacheConfig::new(300, 10));
/// assert!(config.validate().is_ok());
/// assert_eq!(config.base_url, "https://api.github.com");
/// ```
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Authentication settings.
    pub auth: AuthConfig,

    /// API root, e.g. `https://api.github.com` or a GitHub Enterprise URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Value of the `User-Agent` header.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Response cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Retry settings. Required.
    pub retry: RetryConfig,

    /// Rate-limit handling.
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ClientConfig {
    /// Creates a configuration with default endpoint, cache, and throttle
    /// settings.
    #[must_use]
    pub fn new(auth: AuthConfig, retry: RetryConfig) -> Self {
        Self {
            auth,
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            cache: CacheConfig::default(),
            retry,
            throttle: ThrottleConfig::default(),
        }
    }

    /// Replaces the cache settings.
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the throttle settings.
    #[must_use]
    pub fn with_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    /// Replaces the API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Replaces the per-call timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Loads configuration from the default file locations.
    ///
    /// Returns `Ok(None)` when no configuration file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a file is found but cannot be read, parsed, or
    /// validated.
    pub fn load() -> Result<Option<Self>> {
        match find_config_file() {
            Some(path) => Self::load_from(path).map(Some),
            None => Ok(None),
        }
    }

    /// Loads and validates configuration from a specific JSON5 or JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let config: ClientConfig = read_config_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section in one pass.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn validate(&self) -> Result<()> {
        self.auth.validate()?;

        let base_url = self.base_url.trim();
        if !(base_url.starts_with("https://") || base_url.starts_with("http://"))
            || base_url.len() <= "https://".len()
        {
            return Err(ConfigError::InvalidValue {
                field: "base_url",
                reason: format!("'{}' is not an http(s) URL", self.base_url),
            });
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "user_agent",
                reason: "must not be empty".to_string(),
            });
        }
        check_range("timeout_secs", self.timeout_secs, 1, MAX_TIMEOUT_SECS)?;

        self.cache.validate()?;
        self.retry.validate()?;
        self.throttle.validate()?;
        Ok(())
    }
}
