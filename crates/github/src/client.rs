//! GitHub API client implementation.
//!
//! [`GitHubClient`] composes the pieces of this crate: every read computes a
//! cache key, checks the [`CacheStore`], and on a miss sends the request
//! through the [`RetryPolicy`], classifying failures and validating the
//! response shape before caching it.
//!
//! Concurrent reads of the same key are collapsed: the first caller fetches
//! while the others wait, then serve from the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use contribmatch_config::ClientConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, broadcast};
use tracing::{debug, instrument, warn};

use crate::cache::{CacheStats, CacheStore, MemoryCache};
use crate::cache_key::CacheKeyBuilder;
use crate::cancel::CancelSignal;
use crate::context::RequestContext;
use crate::error::{ApiError, Error, Result};
use crate::events::{FailureEvent, FailureEvents};
use crate::models::{Issue, RateLimitStatus, Repository, SearchResults, User, Validate};
use crate::params::{IssueListOptions, SearchOptions, encode_component, path_params};
use crate::rate_limit::{RateLimitState, RateLimitTracker};
use crate::retry::{RetryPolicy, ThrottleHandler};
use crate::transport::{ApiRequest, ApiResponse, HttpMethod, OctocrabTransport, Transport};

/// GraphQL error type GitHub uses for exhausted GraphQL quota.
const GRAPHQL_RATE_LIMITED: &str = "RATE_LIMITED";

/// References to an in-flight slot held while fetching: the map entry, the
/// slot handle, and the owned lock guard.
const SOLE_SLOT_REFERENCES: usize = 3;

/// Request and cache counters for one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    /// Attempts that reached the transport.
    pub network_requests: u64,
    /// Reads answered from the cache, including re-checks after waiting on
    /// an in-flight fetch.
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Debug, Default)]
struct Counters {
    network_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

type InflightMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Exclusive right to fetch one cache key. Removes its map entry on drop
/// when nobody else is waiting.
struct InflightSlot<'a> {
    map: &'a InflightMap,
    key: String,
    slot: Arc<AsyncMutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&self.slot) <= SOLE_SLOT_REFERENCES
            && map
                .get(&self.key)
                .is_some_and(|current| Arc::ptr_eq(current, &self.slot))
        {
            map.remove(&self.key);
        }
    }
}

/// One logical API call.
#[derive(Debug)]
struct Call {
    operation: &'static str,
    method: HttpMethod,
    path: String,
    query: String,
    params: Value,
    body: Option<Value>,
    cacheable: bool,
    graphql: bool,
}

impl Call {
    fn get(operation: &'static str, path: String, params: Value) -> Self {
        Self {
            operation,
            method: HttpMethod::Get,
            path,
            query: String::new(),
            params,
            body: None,
            cacheable: true,
            graphql: false,
        }
    }

    fn with_query(mut self, query: String) -> Self {
        self.query = query;
        self
    }

    fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }

    fn request(&self) -> ApiRequest {
        ApiRequest {
            method: self.method,
            path: format!("{}{}", self.path, self.query),
            body: self.body.clone(),
        }
    }
}

/// Returns `true` if a GraphQL document's first operation is a mutation.
#[must_use]
pub fn is_mutation(query: &str) -> bool {
    query
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .and_then(|line| line.strip_prefix("mutation"))
        .is_some_and(|rest| !rest.starts_with(|c: char| c.is_alphanumeric() || c == '_'))
}

/// Typed, cached, retrying GitHub API client.
///
/// # Examples
///
/// ```no_run
/// use contribmatch_config::{AuthConfig, ClientConfig, RetryConfig};
/// use contribmatch_github::GitHubClient;
///
/// # async fn example() -> contribmatch_github::Result<()> {
/// let config = ClientConfig::new(AuthConfig::token("ghp_xxx"), RetryConfig::new(2));
/// let client = GitHubClient::new(config)?;
///
/// let repo = client.get_repository("rust-lang", "rust").await?;
/// println!("{} has {} stars", repo.full_name, repo.stargazers_count);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct GitHubClient {
    transport: Arc<dyn Transport>,
    cache: Arc<dyn CacheStore>,
    policy: RetryPolicy,
    keys: CacheKeyBuilder,
    cache_ttl: Duration,
    timeout: Duration,
    rate_limits: RateLimitTracker,
    counters: Counters,
    inflight: InflightMap,
    failures: FailureEvents,
}

/// Builder for [`GitHubClient`] with injectable collaborators.
#[derive(Debug)]
pub struct GitHubClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    cache: Option<Arc<dyn CacheStore>>,
    throttle_handler: Option<Arc<dyn ThrottleHandler>>,
}

impl GitHubClientBuilder {
    /// Uses the given transport instead of octocrab.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Uses the given cache instead of a fresh [`MemoryCache`].
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Consults `handler` before waiting out a rate limit.
    #[must_use]
    pub fn throttle_handler(mut self, handler: Arc<dyn ThrottleHandler>) -> Self {
        self.throttle_handler = Some(handler);
        self
    }

    /// Validates the configuration and builds the client.
    ///
    /// Without an injected transport this must be called within a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid configuration,
    /// [`Error::PrivateKey`] for an unreadable App key, and
    /// [`Error::Transport`] if the octocrab client cannot be built.
    #[instrument(skip(self), fields(auth = self.config.auth.kind()))]
    pub fn build(self) -> Result<GitHubClient> {
        let config = self.config;
        config.validate()?;

        let mut policy = RetryPolicy::from_config(&config.retry, &config.throttle)?;
        if let Some(handler) = self.throttle_handler {
            policy = policy.with_handler(handler);
        }
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(OctocrabTransport::from_config(&config)?),
        };
        let cache: Arc<dyn CacheStore> = match self.cache {
            Some(cache) => cache,
            None => Arc::new(MemoryCache::new(config.cache.max_size)),
        };

        debug!(
            retries = config.retry.retries,
            cache_max_age = config.cache.max_age,
            cache_max_size = config.cache.max_size,
            "created GitHub client"
        );
        Ok(GitHubClient {
            transport,
            cache,
            policy,
            keys: CacheKeyBuilder::default(),
            cache_ttl: Duration::from_secs(config.cache.max_age),
            timeout: Duration::from_secs(config.timeout_secs),
            rate_limits: RateLimitTracker::new(),
            counters: Counters::default(),
            inflight: Mutex::new(HashMap::new()),
            failures: FailureEvents::default(),
        })
    }
}

impl GitHubClient {
    /// Starts a builder for injecting a transport, cache, or throttle
    /// handler.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use contribmatch_config::{AuthConfig, ClientConfig, RetryConfig};
    /// use contribmatch_github::{AlwaysRetry, GitHubClient, MemoryCache};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> contribmatch_github::Result<()> {
    /// let config = ClientConfig::new(AuthConfig::token("ghp_xxx"), RetryConfig::new(2));
    /// let client = GitHubClient::builder(config)
    ///     .cache(Arc::new(MemoryCache::new(100)))
    ///     .throttle_handler(Arc::new(AlwaysRetry))
    ///     .build()?;
    /// assert_eq!(client.stats().network_requests, 0);
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn builder(config: ClientConfig) -> GitHubClientBuilder {
        GitHubClientBuilder {
            config,
            transport: None,
            cache: None,
            throttle_handler: None,
        }
    }

    /// Builds a client with the octocrab transport and an in-memory cache.
    ///
    /// # Errors
    ///
    /// See [`GitHubClientBuilder::build`].
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Returns the user the client is authenticated as.
    ///
    /// # Errors
    ///
    /// Returns the classified error once retries are exhausted.
    pub async fn get_authenticated_user(&self) -> Result<User> {
        self.get_authenticated_user_with_cancel(&CancelSignal::never())
            .await
    }

    /// [`Self::get_authenticated_user`], abandoned when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires before the response
    /// arrives; otherwise as the uncancellable variant.
    #[instrument(skip(self, cancel))]
    pub async fn get_authenticated_user_with_cancel(&self, cancel: &CancelSignal) -> Result<User> {
        let call = Call::get("get_authenticated_user", "/user".to_string(), json!({}));
        self.fetch(call, cancel).await
    }

    /// Returns a user by login.
    ///
    /// # Errors
    ///
    /// Returns a `Client` error (404) for unknown users.
    pub async fn get_user(&self, username: &str) -> Result<User> {
        self.get_user_with_cancel(username, &CancelSignal::never())
            .await
    }

    /// [`Self::get_user`], abandoned when `cancel` fires.
    ///
    /// # Errors
    ///
    /// See [`Self::get_authenticated_user_with_cancel`].
    #[instrument(skip(self, cancel), fields(username = %username))]
    pub async fn get_user_with_cancel(&self, username: &str, cancel: &CancelSignal) -> Result<User> {
        let call = Call::get(
            "get_user",
            user_path(username),
            path_params(&[("username", username)]),
        );
        self.fetch(call, cancel).await
    }

    /// Returns a repository.
    ///
    /// # Errors
    ///
    /// Returns a `Client` error (404) for unknown or inaccessible
    /// repositories.
    pub async fn get_repository(&self, owner: &str, repo: &str) -> Result<Repository> {
        self.get_repository_with_cancel(owner, repo, &CancelSignal::never())
            .await
    }

    /// [`Self::get_repository`], abandoned when `cancel` fires.
    #[instrument(skip(self, cancel), fields(owner = %owner, repo = %repo))]
    pub async fn get_repository_with_cancel(
        &self,
        owner: &str,
        repo: &str,
        cancel: &CancelSignal,
    ) -> Result<Repository> {
        let call = Call::get(
            "get_repository",
            repo_path(owner, repo),
            path_params(&[("owner", owner), ("repo", repo)]),
        );
        self.fetch(call, cancel).await
    }

    /// Searches repositories.
    ///
    /// # Errors
    ///
    /// Returns a `Client` error (422) for malformed queries.
    pub async fn search_repositories(
        &self,
        options: &SearchOptions,
    ) -> Result<SearchResults<Repository>> {
        self.search_repositories_with_cancel(options, &CancelSignal::never())
            .await
    }

    /// [`Self::search_repositories`], abandoned when `cancel` fires.
    #[instrument(skip(self, options, cancel), fields(query = %options.query))]
    pub async fn search_repositories_with_cancel(
        &self,
        options: &SearchOptions,
        cancel: &CancelSignal,
    ) -> Result<SearchResults<Repository>> {
        let call = Call::get(
            "search_repositories",
            "/search/repositories".to_string(),
            options.to_params(),
        )
        .with_query(options.query_string());
        self.fetch(call, cancel).await
    }

    /// Lists a repository's issues, excluding pull requests.
    ///
    /// # Errors
    ///
    /// Returns the classified error once retries are exhausted.
    pub async fn list_issues(
        &self,
        owner: &str,
        repo: &str,
        options: &IssueListOptions,
    ) -> Result<Vec<Issue>> {
        self.list_issues_with_cancel(owner, repo, options, &CancelSignal::never())
            .await
    }

    /// [`Self::list_issues`], abandoned when `cancel` fires.
    #[instrument(skip(self, options, cancel), fields(owner = %owner, repo = %repo))]
    pub async fn list_issues_with_cancel(
        &self,
        owner: &str,
        repo: &str,
        options: &IssueListOptions,
        cancel: &CancelSignal,
    ) -> Result<Vec<Issue>> {
        debug!(
            state = options.state.as_str(),
            labels = ?options.labels,
            per_page = options.effective_per_page(),
            "listing issues"
        );
        let mut params = path_params(&[("owner", owner), ("repo", repo)]);
        if let (Some(target), Value::Object(extra)) = (params.as_object_mut(), options.to_params()) {
            target.extend(extra);
        }
        let call = Call::get(
            "list_issues",
            format!("{}/issues", repo_path(owner, repo)),
            params,
        )
        .with_query(options.query());

        let issues: Vec<Issue> = self.fetch(call, cancel).await?;
        let issues: Vec<_> = issues
            .into_iter()
            .filter(|issue| !issue.is_pull_request())
            .collect();
        debug!(count = issues.len(), "listed issues (excluding pull requests)");
        Ok(issues)
    }

    /// Returns one issue.
    ///
    /// # Errors
    ///
    /// Returns a `Client` error (404) for unknown issues.
    pub async fn get_issue(&self, owner: &str, repo: &str, number: u64) -> Result<Issue> {
        self.get_issue_with_cancel(owner, repo, number, &CancelSignal::never())
            .await
    }

    /// [`Self::get_issue`], abandoned when `cancel` fires.
    ///
    /// # Errors
    ///
    /// See [`Self::get_authenticated_user_with_cancel`].
    #[instrument(skip(self, cancel), fields(owner = %owner, repo = %repo, number = number))]
    pub async fn get_issue_with_cancel(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        cancel: &CancelSignal,
    ) -> Result<Issue> {
        let call = Call::get(
            "get_issue",
            format!("{}/issues/{number}", repo_path(owner, repo)),
            json!({"owner": owner, "repo": repo, "number": number}),
        );
        self.fetch(call, cancel).await
    }

    /// Runs a GraphQL document and returns its `data`.
    ///
    /// Queries are cached; mutations never are.
    ///
    /// # Errors
    ///
    /// GraphQL `errors` surface as non-retryable `Client` errors, except
    /// `RATE_LIMITED`, which is a retryable rate-limit error. A response
    /// without `data` is a `Validation` error.
    pub async fn graphql(&self, query: &str, variables: Value) -> Result<Value> {
        self.graphql_with_cancel(query, variables, &CancelSignal::never())
            .await
    }

    /// [`Self::graphql`], abandoned when `cancel` fires.
    #[instrument(skip(self, query, variables, cancel), fields(mutation = is_mutation(query)))]
    pub async fn graphql_with_cancel(
        &self,
        query: &str,
        variables: Value,
        cancel: &CancelSignal,
    ) -> Result<Value> {
        let body = json!({"query": query, "variables": variables});
        let call = Call {
            operation: "graphql",
            method: HttpMethod::Post,
            path: "/graphql".to_string(),
            query: String::new(),
            params: body.clone(),
            body: Some(body),
            cacheable: !is_mutation(query),
            graphql: true,
        };
        self.fetch(call, cancel).await
    }

    /// Returns current quota for every resource. Never cached.
    ///
    /// # Errors
    ///
    /// Returns the classified error once retries are exhausted.
    pub async fn get_rate_limit(&self) -> Result<RateLimitStatus> {
        self.get_rate_limit_with_cancel(&CancelSignal::never())
            .await
    }

    /// [`Self::get_rate_limit`], abandoned when `cancel` fires.
    #[instrument(skip(self, cancel))]
    pub async fn get_rate_limit_with_cancel(&self, cancel: &CancelSignal) -> Result<RateLimitStatus> {
        let call = Call::get("get_rate_limit", "/rate_limit".to_string(), json!({})).uncached();
        self.fetch(call, cancel).await
    }

    /// Drops every cached response for a repository and its sub-resources.
    pub async fn invalidate_repository(&self, owner: &str, repo: &str) -> usize {
        let path = repo_path(owner, repo);
        let removed = self
            .cache
            .invalidate_pattern(&self.keys.pattern("*", &path))
            .await
            + self
                .cache
                .invalidate_pattern(&self.keys.pattern("*", &format!("{path}/*")))
                .await;
        debug!(owner, repo, removed, "invalidated repository cache");
        removed
    }

    /// Drops every cached response for a user.
    pub async fn invalidate_user(&self, username: &str) -> usize {
        let removed = self
            .cache
            .invalidate_pattern(&self.keys.pattern("*", &user_path(username)))
            .await;
        debug!(username, removed, "invalidated user cache");
        removed
    }

    /// Drops every cached response, including other clients' entries when
    /// the cache is shared.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Rate-limit state observed in response headers, per resource.
    #[must_use]
    pub fn rate_limits(&self) -> Vec<RateLimitState> {
        self.rate_limits.snapshot()
    }

    /// Request and cache counters since the client was built.
    #[must_use]
    pub fn stats(&self) -> ClientStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        ClientStats {
            network_requests: load(&self.counters.network_requests),
            cache_hits: load(&self.counters.cache_hits),
            cache_misses: load(&self.counters.cache_misses),
        }
    }

    /// Counters of the underlying cache store.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Subscribes to calls that failed for good.
    #[must_use]
    pub fn subscribe_failures(&self) -> broadcast::Receiver<FailureEvent> {
        self.failures.subscribe()
    }

    async fn fetch<T>(&self, call: Call, cancel: &CancelSignal) -> Result<T>
    where
        T: DeserializeOwned + Validate,
    {
        if !call.cacheable {
            return self.execute(&call, cancel).await.map(|(value, _)| value);
        }

        let key = self
            .keys
            .build(call.method.as_str(), &call.path, &call.params);
        if let Some(value) = self.lookup(&key).await {
            return Ok(value);
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        let _slot = self.acquire(&key, call.operation, cancel).await?;
        // Another caller may have filled the entry while we waited.
        if let Some(value) = self.lookup(&key).await {
            return Ok(value);
        }

        let (value, raw) = self.execute(&call, cancel).await?;
        if cancel.is_cancelled() {
            debug!(key, "call cancelled, not caching response");
        } else if !self.cache.set(&key, raw, self.cache_ttl).await {
            debug!(key, "response was not cached");
        }
        Ok(value)
    }

    async fn lookup<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let raw = self.cache.get(key).await?;
        match T::deserialize(&raw) {
            Ok(value) => {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "served from cache");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable cache entry");
                self.cache.delete(key).await;
                None
            }
        }
    }

    async fn acquire(
        &self,
        key: &str,
        operation: &str,
        cancel: &CancelSignal,
    ) -> Result<InflightSlot<'_>> {
        let slot = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone();
        let guard = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(Error::Cancelled { operation: operation.to_string() });
            }
            guard = Arc::clone(&slot).lock_owned() => guard,
        };
        Ok(InflightSlot {
            map: &self.inflight,
            key: key.to_string(),
            slot,
            _guard: guard,
        })
    }

    /// Runs the call through the retry policy. Returns the typed value and
    /// the raw payload to cache.
    async fn execute<T>(&self, call: &Call, cancel: &CancelSignal) -> Result<(T, Value)>
    where
        T: DeserializeOwned + Validate,
    {
        let context = RequestContext::new(
            call.method,
            call.operation,
            &call.path,
            &call.params,
            self.policy.max_retries(),
        );
        let result = self
            .policy
            .run(&context, cancel, |ctx| self.attempt(call, ctx))
            .await;
        if let Err(Error::Api(error)) = &result {
            warn!(
                operation = call.operation,
                category = %error.category(),
                status = ?error.status(),
                attempts = error.attempt(),
                "GitHub call failed"
            );
            self.failures.publish(error);
        }
        result
    }

    async fn attempt<T>(
        &self,
        call: &Call,
        ctx: RequestContext,
    ) -> std::result::Result<(T, Value), ApiError>
    where
        T: DeserializeOwned + Validate,
    {
        self.counters
            .network_requests
            .fetch_add(1, Ordering::Relaxed);
        let response = match tokio::time::timeout(self.timeout, self.transport.send(call.request()))
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(ApiError::network(ctx, e.to_string())),
            Err(_) => return Err(ApiError::timeout(ctx, self.timeout)),
        };
        self.rate_limits.observe(&response);

        if !response.is_success() {
            return Err(ApiError::from_response(ctx, &response));
        }

        let body: Value = serde_json::from_str(&response.body).map_err(|e| {
            ApiError::validation(ctx.clone(), Some(response.status), format!("invalid JSON: {e}"))
        })?;
        let payload = if call.graphql {
            graphql_data(&ctx, &response, body)?
        } else {
            body
        };

        let value = T::deserialize(&payload).map_err(|e| {
            ApiError::validation(
                ctx.clone(),
                Some(response.status),
                format!("unexpected response shape: {e}"),
            )
        })?;
        value
            .validate()
            .map_err(|e| ApiError::validation(ctx, Some(response.status), e))?;
        Ok((value, payload))
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

/// Extracts `data` from a GraphQL response body, classifying `errors`.
fn graphql_data(
    ctx: &RequestContext,
    response: &ApiResponse,
    mut body: Value,
) -> std::result::Result<Value, ApiError> {
    if let Some(errors) = body.get("errors").filter(|errors| {
        errors.as_array().is_some_and(|errors| !errors.is_empty())
    }) {
        let errors: Vec<GraphQlError> = serde_json::from_value(errors.clone()).map_err(|e| {
            ApiError::validation(
                ctx.clone(),
                Some(response.status),
                format!("malformed GraphQL errors: {e}"),
            )
        })?;
        let message = errors
            .iter()
            .map(|error| error.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        if errors
            .iter()
            .any(|error| error.kind.as_deref() == Some(GRAPHQL_RATE_LIMITED))
        {
            return Err(ApiError::graphql_rate_limited(ctx.clone(), response, message));
        }
        return Err(ApiError::graphql(ctx.clone(), message));
    }

    match body.get_mut("data").map(Value::take) {
        Some(Value::Null) | None => Err(ApiError::validation(
            ctx.clone(),
            Some(response.status),
            "GraphQL response has no data",
        )),
        Some(data) => Ok(data),
    }
}

fn repo_path(owner: &str, repo: &str) -> String {
    format!(
        "/repos/{}/{}",
        encode_component(owner),
        encode_component(repo)
    )
}

fn user_path(username: &str) -> String {
    format!("/users/{}", encode_component(username))
}
