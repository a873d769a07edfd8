//! Typed GitHub API response models.
//!
//! Only the fields the client relies on are required; everything else is
//! optional or defaulted so additive API changes do not break parsing.
//! After deserialisation each model is checked with [`Validate`]; a response
//! that parses but violates the expected shape is a validation error.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shape checks applied to a response after it has been parsed.
pub trait Validate {
    /// Returns a description of the first violated expectation.
    fn validate(&self) -> Result<(), String>;
}

impl<T: Validate> Validate for Vec<T> {
    fn validate(&self) -> Result<(), String> {
        self.iter()
            .enumerate()
            .try_for_each(|(i, item)| item.validate().map_err(|e| format!("item {i}: {e}")))
    }
}

impl Validate for Value {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

fn require(condition: bool, message: &str) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(message.to_string())
    }
}

/// A GitHub user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    /// `User`, `Organization`, or `Bot`.
    #[serde(rename = "type", default)]
    pub account_type: Option<String>,
    #[serde(default)]
    pub public_repos: Option<u64>,
    #[serde(default)]
    pub followers: Option<u64>,
    #[serde(default)]
    pub following: Option<u64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Validate for User {
    fn validate(&self) -> Result<(), String> {
        require(self.id > 0, "user id must be positive")?;
        require(!self.login.is_empty(), "user login must not be empty")
    }
}

/// The abbreviated account embedded in repositories and issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: u64,
    pub login: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(rename = "type", default)]
    pub account_type: Option<String>,
}

impl Validate for Owner {
    fn validate(&self) -> Result<(), String> {
        require(!self.login.is_empty(), "owner login must not be empty")
    }
}

/// A GitHub repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub owner: Owner,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub open_issues_count: u64,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
}

impl Validate for Repository {
    fn validate(&self) -> Result<(), String> {
        require(self.id > 0, "repository id must be positive")?;
        require(!self.name.is_empty(), "repository name must not be empty")?;
        require(
            self.full_name.split_once('/').is_some_and(|(owner, name)| {
                !owner.is_empty() && name == self.name
            }),
            "repository full_name must be `owner/name`",
        )?;
        self.owner.validate()
    }
}

/// An issue label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    #[serde(default)]
    pub id: Option<u64>,
    pub name: String,
    /// Hex color without the leading `#`.
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A GitHub issue. The issues endpoint also returns pull requests; those
/// carry a `pull_request` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: u64,
    pub number: u64,
    pub title: String,
    /// `open` or `closed`.
    pub state: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub user: Option<Owner>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<Value>,
}

impl Issue {
    #[must_use]
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    #[must_use]
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|label| label.name == name)
    }
}

impl Validate for Issue {
    fn validate(&self) -> Result<(), String> {
        require(self.number > 0, "issue number must be positive")?;
        require(
            matches!(self.state.as_str(), "open" | "closed"),
            "issue state must be `open` or `closed`",
        )
    }
}

/// A page of search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults<T> {
    pub total_count: u64,
    #[serde(default)]
    pub incomplete_results: bool,
    pub items: Vec<T>,
}

impl<T: Validate> Validate for SearchResults<T> {
    fn validate(&self) -> Result<(), String> {
        require(
            self.items.len() as u64 <= self.total_count,
            "search returned more items than total_count",
        )?;
        self.items.validate()
    }
}

/// Quota of one rate-limit resource as reported by `/rate_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitResource {
    pub limit: u64,
    pub remaining: u64,
    /// Unix timestamp at which the quota resets.
    pub reset: i64,
    #[serde(default)]
    pub used: u64,
}

impl RateLimitResource {
    #[must_use]
    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.reset, 0).single()
    }
}

/// Response of `GET /rate_limit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub resources: HashMap<String, RateLimitResource>,
    /// Legacy mirror of `resources.core`.
    #[serde(default)]
    pub rate: Option<RateLimitResource>,
}

impl RateLimitStatus {
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&RateLimitResource> {
        self.resources.get(name)
    }

    #[must_use]
    pub fn core(&self) -> Option<&RateLimitResource> {
        self.resource("core").or(self.rate.as_ref())
    }
}

impl Validate for RateLimitStatus {
    fn validate(&self) -> Result<(), String> {
        require(
            !self.resources.is_empty(),
            "rate limit response lists no resources",
        )?;
        self.resources.iter().try_for_each(|(name, resource)| {
            require(
                resource.remaining <= resource.limit,
                &format!("{name}: remaining exceeds limit"),
            )
        })
    }
}
