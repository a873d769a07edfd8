//! Error classification for GitHub API operations.
//!
//! Every failed call is turned into an [`ApiError`]: a category, a
//! retryability flag decided once at construction, the HTTP status (if
//! any), and the redacted [`RequestContext`] of the failing attempt. The
//! retry policy reads these fields; callers get the same object back once
//! retries are exhausted.
//!
//! | Status / cause                  | Category     | Retryable |
//! |---------------------------------|--------------|-----------|
//! | 408, 429                        | `Client`     | yes       |
//! | other 4xx                       | `Client`     | no        |
//! | 5xx                             | `Server`     | yes       |
//! | 403/429 with rate-limit marker  | `RateLimit`  | yes       |
//! | connection failure, timeout     | `Network`    | yes       |
//! | response shape mismatch         | `Validation` | no        |

use std::fmt;
use std::time::Duration;

use contribmatch_config::ConfigError;
use serde::Serialize;
use serde_json::Value;

use crate::context::RequestContext;
use crate::rate_limit::{self, RateLimitDetail, RateLimitKind};
use crate::transport::ApiResponse;

/// Longest error message kept from a response body.
const MAX_MESSAGE_LEN: usize = 512;

/// Machine-readable failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The request itself was rejected (4xx).
    Client,
    /// GitHub failed to serve the request (5xx).
    Server,
    /// No usable response arrived (connection failure, timeout).
    Network,
    /// A primary or secondary rate limit rejected the request.
    RateLimit,
    /// The response did not have the expected shape.
    Validation,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Validation => "validation",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps an HTTP error status to its category and retryability.
///
/// # Examples
///
/// ```
/// use contribmatch_github::{ErrorCategory, classify_status};
///
/// assert_eq!(classify_status(404), (ErrorCategory::Client, false));
/// assert_eq!(classify_status(429), (ErrorCategory::Client, true));
/// assert_eq!(classify_status(503), (ErrorCategory::Server, true));
/// ```
#[must_use]
pub fn classify_status(status: u16) -> (ErrorCategory, bool) {
    match status {
        408 | 429 => (ErrorCategory::Client, true),
        500..=599 => (ErrorCategory::Server, true),
        _ => (ErrorCategory::Client, false),
    }
}

/// A classified failure of one GitHub API call.
///
/// Immutable once built. Never contains credentials: the context holds
/// redacted parameters only and the message comes from the response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiError {
    category: ErrorCategory,
    retryable: bool,
    status: Option<u16>,
    message: String,
    rate_limit: Option<RateLimitDetail>,
    context: RequestContext,
}

impl ApiError {
    /// Classifies a non-success HTTP response.
    #[must_use]
    pub fn from_response(context: RequestContext, response: &ApiResponse) -> Self {
        let message = response_message(response);
        if let Some(detail) = rate_limit::detect(response, &message) {
            return Self {
                category: ErrorCategory::RateLimit,
                retryable: true,
                status: Some(response.status),
                message,
                rate_limit: Some(detail),
                context,
            };
        }

        let (category, retryable) = classify_status(response.status);
        Self {
            category,
            retryable,
            status: Some(response.status),
            message,
            rate_limit: None,
            context,
        }
    }

    /// A failure below the HTTP layer.
    #[must_use]
    pub fn network(context: RequestContext, message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Network,
            retryable: true,
            status: None,
            message: truncate(message.into()),
            rate_limit: None,
            context,
        }
    }

    /// The call exceeded its timeout.
    #[must_use]
    pub fn timeout(context: RequestContext, after: Duration) -> Self {
        Self::network(context, format!("request timed out after {}s", after.as_secs_f64()))
    }

    /// The response did not match the expected schema.
    #[must_use]
    pub fn validation(
        context: RequestContext,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category: ErrorCategory::Validation,
            retryable: false,
            status,
            message: truncate(message.into()),
            rate_limit: None,
            context,
        }
    }

    /// GraphQL reported errors alongside a 200 response.
    #[must_use]
    pub fn graphql(context: RequestContext, message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Client,
            retryable: false,
            status: None,
            message: truncate(message.into()),
            rate_limit: None,
            context,
        }
    }

    /// GraphQL reported a `RATE_LIMITED` error.
    #[must_use]
    pub fn graphql_rate_limited(
        context: RequestContext,
        response: &ApiResponse,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category: ErrorCategory::RateLimit,
            retryable: true,
            status: Some(response.status),
            message: truncate(message.into()),
            rate_limit: Some(RateLimitDetail {
                kind: RateLimitKind::Primary,
                retry_after: rate_limit::parse_retry_after(response),
                reset_at: crate::rate_limit::RateLimitState::from_response(response)
                    .map(|state| state.reset),
            }),
            context,
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn rate_limit(&self) -> Option<&RateLimitDetail> {
        self.rate_limit.as_ref()
    }

    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    #[must_use]
    pub fn operation(&self) -> &str {
        self.context.operation()
    }

    /// 1-based attempt that produced this error.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.context.attempt()
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.context.max_retries()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error", self.category)?;
        if let Some(status) = self.status {
            write!(f, " ({status})")?;
        }
        write!(
            f,
            " in {} [attempt {}/{}]: {}",
            self.context.operation(),
            self.context.attempt(),
            self.context.max_retries() + 1,
            self.message
        )
    }
}

impl std::error::Error for ApiError {}

/// Extracts GitHub's `message` field, falling back to the raw body.
fn response_message(response: &ApiResponse) -> String {
    let from_json = serde_json::from_str::<Value>(&response.body)
        .ok()
        .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string));
    let message = match from_json {
        Some(message) => message,
        None if response.body.trim().is_empty() => format!("HTTP {}", response.status),
        None => response.body.trim().to_string(),
    };
    truncate(message)
}

fn truncate(mut message: String) -> String {
    if message.len() > MAX_MESSAGE_LEN {
        let mut end = MAX_MESSAGE_LEN;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
        message.push('…');
    }
    message
}

/// Errors returned by the GitHub client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A classified API failure, after retries were exhausted or skipped.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The client configuration was rejected at construction.
    #[error("invalid client configuration: {0}")]
    Config(#[from] ConfigError),

    /// The caller cancelled the call.
    #[error("{operation} was cancelled")]
    Cancelled {
        /// The operation that was cancelled.
        operation: String,
    },

    /// The octocrab client could not be constructed.
    #[error("failed to initialise GitHub transport: {0}")]
    Transport(#[from] octocrab::Error),

    /// The GitHub App private key could not be parsed.
    #[error("invalid GitHub App private key: {0}")]
    PrivateKey(#[from] jsonwebtoken::errors::Error),
}

impl Error {
    /// Returns the classified API error, if this is one.
    #[must_use]
    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            Self::Api(err) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub fn category(&self) -> Option<ErrorCategory> {
        self.as_api().map(ApiError::category)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// A specialized Result type for GitHub API operations.
pub type Result<T> = std::result::Result<T, Error>;
