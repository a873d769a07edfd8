//! GitHub API client for contribmatch.
//!
//! This crate wraps the GitHub REST and GraphQL APIs behind a small typed
//! client with response caching, error classification, and rate-limit
//! aware retries.
//!
//! # Overview
//!
//! - [`GitHubClient`]: typed operations (users, repositories, search,
//!   issues, GraphQL, rate limits)
//! - [`cache_key`]: deterministic, order-independent cache keys
//! - [`CacheStore`] and [`MemoryCache`]: pluggable TTL cache storage
//! - [`ApiError`] and [`ErrorCategory`]: classified failures with redacted
//!   request context
//! - [`RetryPolicy`]: exponential backoff plus primary/secondary rate-limit
//!   handling
//! - [`Transport`]: the HTTP seam, backed by octocrab in production
//!
//! # Caching
//!
//! Every read is keyed by `github:METHOD:path:params`, with parameters
//! serialised with sorted keys so equivalent calls share an entry:
//!
//! ```
//! use contribmatch_github::cache_key::cache_key;
//! use serde_json::json;
//!
//! assert_eq!(
//!     cache_key("GET", "/repos/o/r", &json!({"owner": "o", "repo": "r"})),
//!     cache_key("GET", "/repos/o/r", &json!({"repo": "r", "owner": "o"})),
//! );
//! ```
//!
//! # Errors
//!
//! Failed calls surface as [`Error::Api`] once the retry policy gives up.
//! The error carries a category, whether it was retryable, the HTTP status,
//! and the attempt it failed on; it never contains the token.
//!
//! ```no_run
//! use contribmatch_config::{AuthConfig, ClientConfig, RetryConfig};
//! use contribmatch_github::{ErrorCategory, GitHubClient};
//!
//! # async fn example() -> contribmatch_github::Result<()> {
//! let client = GitHubClient::new(ClientConfig::new(
//!     AuthConfig::token("ghp_xxx"),
//!     RetryConfig::new(2),
//! ))?;
//!
//! match client.get_user("does-not-exist").await {
//!     Ok(user) => println!("found {}", user.login),
//!     Err(e) if e.category() == Some(ErrorCategory::Client) => println!("no such user"),
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cache_key;
pub mod cancel;
pub mod client;
pub mod context;
pub mod error;
pub mod events;
pub mod models;
pub mod params;
pub mod rate_limit;
pub mod retry;
pub mod transport;

pub use cache::{CacheStats, CacheStore, MemoryCache};
pub use cache_key::CacheKeyBuilder;
pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use client::{ClientStats, GitHubClient, GitHubClientBuilder};
pub use context::RequestContext;
pub use error::{ApiError, Error, ErrorCategory, Result, classify_status};
pub use events::FailureEvent;
pub use models::{
    Issue, Label, Owner, RateLimitResource, RateLimitStatus, Repository, SearchResults, User,
    Validate,
};
pub use params::{IssueListOptions, IssueState, SearchOptions, SearchSort, SortOrder};
pub use rate_limit::{RateLimitDetail, RateLimitKind, RateLimitState};
pub use retry::{
    AlwaysRetry, AttemptState, Backoff, GiveUpReason, RateLimitEvent, RetryDecision, RetryPolicy,
    RetryState, ThrottleHandler,
};
pub use transport::{
    ApiRequest, ApiResponse, HttpMethod, OctocrabTransport, Transport, TransportError,
};
