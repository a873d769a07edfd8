//! Error types for configuration operations.
//!
//! This module defines the error types that can occur during configuration
//! loading, parsing, and validation.

use std::path::PathBuf;

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("failed to read config file at {path}: {source}")]
    ReadFile {
        /// The path that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse JSON5 configuration.
    #[error("failed to parse config: {0}")]
    ParseJson5(#[from] serde_json5::Error),

    /// The authentication settings are unusable.
    #[error("invalid auth configuration: {reason}")]
    InvalidAuth {
        /// Why the auth settings were rejected.
        reason: String,
    },

    /// A numeric setting is outside its accepted range.
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        /// The dotted path of the offending field.
        field: &'static str,
        /// The rejected value.
        value: u64,
        /// Inclusive lower bound.
        min: u64,
        /// Inclusive upper bound.
        max: u64,
    },

    /// A setting has an unusable value.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// The dotted path of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Invalid repository reference.
    #[error("invalid repository format: {0}")]
    InvalidRepository(String),

    /// No token could be found in any source.
    #[error("no GitHub token available (set one in the config file, GITHUB_TOKEN, or `gh auth login`)")]
    MissingToken,

    /// Failed to execute `gh auth token` command.
    #[error("failed to get GitHub token from gh CLI: {0}")]
    GhAuthFailed(#[source] std::io::Error),

    /// The `gh auth token` command returned an error.
    #[error("gh auth token failed with exit code {code:?}: {stderr}")]
    GhAuthError {
        /// The exit code, if available.
        code: Option<i32>,
        /// The stderr output.
        stderr: String,
    },
}

/// A specialized Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_display() {
        let err = ConfigError::OutOfRange {
            field: "retry.retries",
            value: 11,
            min: 0,
            max: 10,
        };
        assert_eq!(
            err.to_string(),
            "retry.retries must be between 0 and 10, got 11"
        );
    }

    #[test]
    fn invalid_auth_display() {
        let err = ConfigError::InvalidAuth {
            reason: "token must not be empty".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid auth configuration: token must not be empty"
        );
    }
}
