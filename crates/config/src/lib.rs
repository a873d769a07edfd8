//! Configuration management for the contribmatch GitHub client.
//!
//! This crate defines every option the GitHub client accepts, validates them
//! eagerly, and loads them from JSON5/JSON files.
//!
//! # Overview
//!
//! - [`config`]: [`ClientConfig`] and [`CacheConfig`], loading and validation
//! - [`auth`]: [`AuthConfig`] (token vs. GitHub App) and token resolution
//! - [`retry`]: [`RetryConfig`] and [`ThrottleConfig`]
//! - [`repository`]: `owner/repo` references
//! - [`persistence`]: config file discovery and reading
//! - [`error`]: error types for configuration operations
//!
//! # File Format
//!
//! ```json5
//! {
//!   auth: { type: "token", token: "ghp_xxx" },
//!   cache: { max_age: 300, max_size: 1000 },
//!   // Required: there is no implicit retry count
//!   retry: { retries: 3, do_not_retry: ["400", "401", "404", "422"] },
//!   throttle: { enabled: true, secondary_backoff_secs: 60 },
//! }
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use contribmatch_config::ClientConfig;
//!
//! # fn example() -> contribmatch_config::Result<()> {
//! let config = ClientConfig::load_from("contribmatch.json5")?;
//! println!("retrying up to {} times", config.retry.retries);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod persistence;
pub mod repository;
pub mod retry;

pub use auth::AuthConfig;
pub use config::{CacheConfig, ClientConfig};
pub use error::{ConfigError, Result};
pub use repository::RepoRef;
pub use retry::{RetryConfig, ThrottleConfig};
