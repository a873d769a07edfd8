//! Repository references in `"owner/repo"` form.
//!
//! # Examples
//!
//! ```
//! use contribmatch_config::RepoRef;
//!
//! let repo: RepoRef = "rust-lang/rust".parse().unwrap();
//! assert_eq!(repo.owner(), "rust-lang");
//! assert_eq!(repo.repo(), "rust");
//! assert_eq!(repo.to_string(), "rust-lang/rust");
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, Result};

/// An `owner/repo` pair identifying a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    owner: String,
    repo: String,
}

impl RepoRef {
    /// Creates a repository reference.
    #[must_use]
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Parses the short format `"owner/repo"`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string does not contain exactly one `/` or
    /// either side is empty.
    pub fn parse_short(s: &str) -> Result<Self> {
        let Some((owner, repo)) = s.split_once('/') else {
            return Err(ConfigError::InvalidRepository(format!(
                "expected 'owner/repo' format, got '{s}'"
            )));
        };
        if repo.contains('/') {
            return Err(ConfigError::InvalidRepository(format!(
                "expected 'owner/repo' format, got '{s}'"
            )));
        }

        let (owner, repo) = (owner.trim(), repo.trim());
        if owner.is_empty() || repo.is_empty() {
            return Err(ConfigError::InvalidRepository(format!(
                "owner and repo cannot be empty in '{s}'"
            )));
        }

        Ok(Self::new(owner, repo))
    }

    /// Returns the repository owner.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the repository name.
    #[must_use]
    pub fn repo(&self) -> &str {
        &self.repo
    }
}

impl FromStr for RepoRef {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_short(s)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_short_valid() {
        let repo = RepoRef::parse_short("rust-lang/rust").unwrap();
        assert_eq!(repo, RepoRef::new("rust-lang", "rust"));
    }

    #[test]
    fn parse_short_with_whitespace() {
        let repo = RepoRef::parse_short("  owner / repo  ").unwrap();
        assert_eq!(repo.owner(), "owner");
        assert_eq!(repo.repo(), "repo");
    }

    #[test]
    fn parse_short_invalid() {
        assert!(RepoRef::parse_short("invalid").is_err());
        assert!(RepoRef::parse_short("too/many/slashes").is_err());
        assert!(RepoRef::parse_short("/repo").is_err());
        assert!(RepoRef::parse_short("owner/").is_err());
        assert!(RepoRef::parse_short("/").is_err());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        let repo: RepoRef = "tokio-rs/tokio".parse().unwrap();
        assert_eq!(repo.to_string().parse::<RepoRef>().unwrap(), repo);
    }
}
