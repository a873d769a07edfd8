//! Request parameters for list and search operations.
//!
//! Options render to both a query string (sent on the wire) and a JSON
//! object (fed to the cache key), so two calls with the same options always
//! share a cache entry.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use serde_json::{Map, Value, json};

/// Characters escaped in path segments and query values: everything except
/// RFC 3986 unreserved characters.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Default page size used by GitHub.
pub const DEFAULT_PER_PAGE: u8 = 30;

/// Largest page size GitHub accepts.
pub const MAX_PER_PAGE: u8 = 100;

/// Percent-encodes one path segment or query value.
#[must_use]
pub fn encode_component(raw: &str) -> String {
    utf8_percent_encode(raw, COMPONENT).to_string()
}

/// Clamps a page size into `1..=100`, mapping 0 to the default.
#[must_use]
pub fn effective_per_page(per_page: u8) -> u8 {
    match per_page {
        0 => DEFAULT_PER_PAGE,
        n => n.min(MAX_PER_PAGE),
    }
}

/// Renders `(key, value)` pairs as `?k=v&...`, or an empty string.
fn query_string(pairs: &[(&str, String)]) -> String {
    if pairs.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = pairs
        .iter()
        .map(|(key, value)| format!("{key}={}", encode_component(value)))
        .collect();
    format!("?{}", rendered.join("&"))
}

fn pairs_to_json(pairs: &[(&str, String)]) -> Value {
    Value::Object(
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), Value::String(value.clone())))
            .collect::<Map<_, _>>(),
    )
}

/// Issue state filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    #[default]
    Open,
    Closed,
    All,
}

impl IssueState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::All => "all",
        }
    }
}

/// Options for listing a repository's issues.
///
/// # Examples
///
/// ```
/// use contribmatch_github::{IssueListOptions, IssueState};
///
/// let options = IssueListOptions {
///     state: IssueState::Open,
///     labels: vec!["good first issue".to_string()],
///     per_page: 50,
///     page: 0,
/// };
/// assert_eq!(
///     options.query(),
///     "?state=open&labels=good%20first%20issue&per_page=50"
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueListOptions {
    pub state: IssueState,
    /// Issues must carry all of these labels.
    pub labels: Vec<String>,
    /// Page size; 0 means the GitHub default.
    pub per_page: u8,
    /// 1-based page; 0 means the first page.
    pub page: u32,
}

impl IssueListOptions {
    #[must_use]
    pub fn effective_per_page(&self) -> u8 {
        effective_per_page(self.per_page)
    }

    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("state", self.state.as_str().to_string())];
        if !self.labels.is_empty() {
            pairs.push(("labels", self.labels.join(",")));
        }
        pairs.push(("per_page", self.effective_per_page().to_string()));
        if self.page > 1 {
            pairs.push(("page", self.page.to_string()));
        }
        pairs
    }

    /// Query string, including the leading `?`.
    #[must_use]
    pub fn query(&self) -> String {
        query_string(&self.pairs())
    }

    /// Parameters as a JSON object, for cache keys and request contexts.
    #[must_use]
    pub fn to_params(&self) -> Value {
        pairs_to_json(&self.pairs())
    }
}

/// Sort field for repository search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchSort {
    Stars,
    Forks,
    HelpWantedIssues,
    Updated,
}

impl SearchSort {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stars => "stars",
            Self::Forks => "forks",
            Self::HelpWantedIssues => "help-wanted-issues",
            Self::Updated => "updated",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Options for `GET /search/repositories`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// GitHub search syntax, e.g. `language:rust good-first-issues:>5`.
    pub query: String,
    pub sort: Option<SearchSort>,
    pub order: Option<SortOrder>,
    pub per_page: u8,
    pub page: u32,
}

impl SearchOptions {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn sort(mut self, sort: SearchSort, order: SortOrder) -> Self {
        self.sort = Some(sort);
        self.order = Some(order);
        self
    }

    #[must_use]
    pub fn per_page(mut self, per_page: u8) -> Self {
        self.per_page = per_page;
        self
    }

    #[must_use]
    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("q", self.query.clone())];
        if let Some(sort) = self.sort {
            pairs.push(("sort", sort.as_str().to_string()));
        }
        if let Some(order) = self.order {
            pairs.push(("order", order.as_str().to_string()));
        }
        pairs.push(("per_page", effective_per_page(self.per_page).to_string()));
        if self.page > 1 {
            pairs.push(("page", self.page.to_string()));
        }
        pairs
    }

    #[must_use]
    pub fn query_string(&self) -> String {
        query_string(&self.pairs())
    }

    #[must_use]
    pub fn to_params(&self) -> Value {
        pairs_to_json(&self.pairs())
    }
}

/// Parameters identifying a single resource path, e.g. owner and repo.
#[must_use]
pub(crate) fn path_params(pairs: &[(&str, &str)]) -> Value {
    let map: Map<String, Value> = pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), json!(value)))
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_page_is_clamped() {
        assert_eq!(effective_per_page(0), 30);
        assert_eq!(effective_per_page(1), 1);
        assert_eq!(effective_per_page(100), 100);
        assert_eq!(effective_per_page(255), 100);
    }

    #[test]
    fn encodes_reserved_characters() {
        assert_eq!(encode_component("a b/c?d&e"), "a%20b%2Fc%3Fd%26e");
        assert_eq!(encode_component("rust-lang_x.y~z"), "rust-lang_x.y~z");
        assert_eq!(encode_component("stars:>10"), "stars%3A%3E10");
    }

    #[test]
    fn default_issue_options() {
        let options = IssueListOptions::default();
        assert_eq!(options.query(), "?state=open&per_page=30");
        assert_eq!(
            options.to_params(),
            json!({"state": "open", "per_page": "30"})
        );
    }

    #[test]
    fn issue_options_with_labels_and_page() {
        let options = IssueListOptions {
            state: IssueState::All,
            labels: vec!["bug".to_string(), "help wanted".to_string()],
            per_page: 10,
            page: 3,
        };
        assert_eq!(
            options.query(),
            "?state=all&labels=bug%2Chelp%20wanted&per_page=10&page=3"
        );
    }

    #[test]
    fn search_options_render() {
        let options = SearchOptions::new("language:rust stars:>100")
            .sort(SearchSort::Stars, SortOrder::Desc)
            .per_page(5)
            .page(2);
        assert_eq!(
            options.query_string(),
            "?q=language%3Arust%20stars%3A%3E100&sort=stars&order=desc&per_page=5&page=2"
        );
        assert_eq!(options.to_params()["q"], "language:rust stars:>100");
    }
}
