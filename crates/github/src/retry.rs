//! Retry and throttle policy for outbound calls.
//!
//! A call moves through an explicit state machine:
//!
//! ```text
//! Attempting(n) ──ok──────────────────────────▶ Succeeded
//!      │
//!      └─err──▶ decide ──Retry(delay)──▶ Waiting(n, delay) ──▶ Attempting(n+1)
//!                  │
//!                  └─GiveUp──▶ Failed
//! ```
//!
//! [`RetryPolicy::decide`] is a pure function of the classified error, the
//! counters so far, and the current time, so every branch is testable
//! without sleeping. [`RetryPolicy::run`] drives the loop, sleeping between
//! attempts and stopping as soon as the [`CancelSignal`] fires.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use contribmatch_config::{RetryConfig, ThrottleConfig};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::context::RequestContext;
use crate::error::{ApiError, Error, Result};
use crate::rate_limit::RateLimitKind;

/// Jitter adds up to `delay / JITTER_DIVISOR` on top of the backoff delay.
const JITTER_DIVISOR: u32 = 4;

/// Shortest wait derived from a rate-limit reset timestamp.
const MIN_RESET_WAIT: Duration = Duration::from_secs(1);

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    jitter: bool,
}

impl Backoff {
    #[must_use]
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling,
            jitter: true,
        }
    }

    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before retrying after the given (1-based) attempt, without
    /// jitter: `base * 2^(attempt - 1)`, capped at the ceiling.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1 << exponent).min(self.ceiling)
    }

    /// [`Self::base_delay`] plus random jitter, if enabled.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if !self.jitter {
            return delay;
        }
        let spread = u64::try_from((delay / JITTER_DIVISOR).as_millis()).unwrap_or(u64::MAX);
        if spread == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::rng().random_range(0..=spread))
    }
}

/// Why the policy stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GiveUpReason {
    /// The retry budget is spent.
    Exhausted,
    /// The error category is never retried.
    NotRetryable,
    /// The status is listed in `do_not_retry`.
    DoNotRetryStatus,
    /// Rate-limited calls are not retried when throttling is disabled.
    ThrottleDisabled,
    /// The rate-limit wait exceeds the configured maximum.
    WaitTooLong,
    /// The secondary rate-limit retry budget is spent.
    SecondaryExhausted,
    /// The throttle handler declined to retry.
    Vetoed,
}

impl fmt::Display for GiveUpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exhausted => "retries exhausted",
            Self::NotRetryable => "error is not retryable",
            Self::DoNotRetryStatus => "status is exempt from retries",
            Self::ThrottleDisabled => "throttling disabled",
            Self::WaitTooLong => "rate limit wait too long",
            Self::SecondaryExhausted => "secondary rate limit retries exhausted",
            Self::Vetoed => "throttle handler declined",
        })
    }
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then make the next attempt.
    Retry { delay: Duration },
    /// Stop and return the error.
    GiveUp { reason: GiveUpReason },
}

/// Counters carried across the attempts of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// 1-based number of the attempt that just failed.
    pub attempt: u32,
    /// Retries already spent on secondary rate limits. Primary limits
    /// only count toward `attempt`.
    pub secondary_retries: u32,
}

impl Default for RetryState {
    fn default() -> Self {
        Self {
            attempt: 1,
            secondary_retries: 0,
        }
    }
}

impl RetryState {
    /// State for the attempt following a retry of `error`.
    #[must_use]
    pub fn next(self, error: &ApiError) -> Self {
        let mut next = Self {
            attempt: self.attempt + 1,
            ..self
        };
        if error
            .rate_limit()
            .is_some_and(|detail| detail.kind == RateLimitKind::Secondary)
        {
            next.secondary_retries += 1;
        }
        next
    }
}

/// Where a call is in its retry sequence. Logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// The request for `attempt` is in flight.
    Attempting { attempt: u32 },
    /// `attempt` failed and the policy is sleeping before the next one.
    Waiting { attempt: u32, delay: Duration },
    Succeeded { attempt: u32 },
    /// `attempt` failed and no retry follows.
    Failed { attempt: u32 },
}

/// A rate-limit hit the policy is about to wait out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEvent {
    /// Correlation id of the rate-limited call.
    pub request_id: Uuid,
    pub operation: String,
    /// Primary or secondary throttle.
    pub kind: RateLimitKind,
    /// 1-based attempt that was rate limited.
    pub attempt: u32,
    /// How long the policy intends to wait.
    pub wait: Duration,
}

/// Hooks consulted before waiting out a rate limit.
///
/// Returning `false` vetoes the retry and surfaces the rate-limit error.
pub trait ThrottleHandler: Send + Sync + fmt::Debug {
    /// Called before waiting out a primary rate limit.
    fn on_rate_limit(&self, _event: &RateLimitEvent) -> bool {
        true
    }

    /// Called before waiting out a secondary rate limit.
    fn on_secondary_rate_limit(&self, _event: &RateLimitEvent) -> bool {
        true
    }
}

/// Handler that always allows the retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl ThrottleHandler for AlwaysRetry {}

/// Decides whether and when to retry failed calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    do_not_retry: Vec<u16>,
    backoff: Backoff,
    throttle: ThrottleConfig,
    handler: Arc<dyn ThrottleHandler>,
}

impl RetryPolicy {
    /// Builds a policy from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a `do_not_retry` entry is not a status
    /// code.
    pub fn from_config(retry: &RetryConfig, throttle: &ThrottleConfig) -> Result<Self> {
        let mut backoff = Backoff::new(
            Duration::from_millis(retry.base_delay_ms),
            Duration::from_millis(retry.max_delay_ms),
        );
        if !retry.jitter {
            backoff = backoff.without_jitter();
        }
        Ok(Self {
            max_retries: retry.retries,
            do_not_retry: retry.do_not_retry_codes()?,
            backoff,
            throttle: throttle.clone(),
            handler: Arc::new(AlwaysRetry),
        })
    }

    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn ThrottleHandler>) -> Self {
        self.handler = handler;
        self
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Decides what to do after `error` ended the attempt described by
    /// `state`.
    #[must_use]
    pub fn decide(&self, error: &ApiError, state: &RetryState, now: DateTime<Utc>) -> RetryDecision {
        let give_up = |reason| RetryDecision::GiveUp { reason };

        if let Some(detail) = error.rate_limit() {
            if !self.throttle.enabled {
                return give_up(GiveUpReason::ThrottleDisabled);
            }
            if state.attempt > self.max_retries {
                return give_up(GiveUpReason::Exhausted);
            }

            let wait = match detail.kind {
                RateLimitKind::Primary => detail
                    .retry_after
                    .or_else(|| {
                        detail.reset_at.map(|reset| {
                            (reset - now)
                                .to_std()
                                .unwrap_or_default()
                                .max(MIN_RESET_WAIT)
                        })
                    })
                    .unwrap_or(Duration::from_secs(self.throttle.default_backoff_secs)),
                RateLimitKind::Secondary => {
                    if state.secondary_retries >= self.throttle.max_secondary_retries {
                        return give_up(GiveUpReason::SecondaryExhausted);
                    }
                    detail
                        .retry_after
                        .unwrap_or(Duration::from_secs(self.throttle.secondary_backoff_secs))
                }
            };
            if wait > Duration::from_secs(self.throttle.max_wait_secs) {
                return give_up(GiveUpReason::WaitTooLong);
            }

            let event = RateLimitEvent {
                request_id: error.context().request_id(),
                operation: error.operation().to_string(),
                kind: detail.kind,
                attempt: state.attempt,
                wait,
            };
            let allowed = match detail.kind {
                RateLimitKind::Primary => self.handler.on_rate_limit(&event),
                RateLimitKind::Secondary => self.handler.on_secondary_rate_limit(&event),
            };
            if !allowed {
                return give_up(GiveUpReason::Vetoed);
            }
            return RetryDecision::Retry { delay: wait };
        }

        if !error.is_retryable() {
            return give_up(GiveUpReason::NotRetryable);
        }
        if error
            .status()
            .is_some_and(|status| self.do_not_retry.contains(&status))
        {
            return give_up(GiveUpReason::DoNotRetryStatus);
        }
        if state.attempt > self.max_retries {
            return give_up(GiveUpReason::Exhausted);
        }
        RetryDecision::Retry {
            delay: self.backoff.delay(state.attempt),
        }
    }

    /// Runs `op` until it succeeds, the policy gives up, or `cancel` fires.
    ///
    /// `op` receives the context of each attempt. Cancellation is observed
    /// both while an attempt is in flight and while waiting between attempts;
    /// no further attempt is made once it fires.
    ///
    /// # Errors
    ///
    /// Returns the last [`ApiError`] when the policy gives up, or
    /// [`Error::Cancelled`].
    pub async fn run<T, F, Fut>(
        &self,
        context: &RequestContext,
        cancel: &CancelSignal,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(RequestContext) -> Fut,
        Fut: Future<Output = std::result::Result<T, ApiError>>,
    {
        let cancelled = || Error::Cancelled {
            operation: context.operation().to_string(),
        };
        let mut state = RetryState::default();

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled());
            }
            log_transition(context, AttemptState::Attempting { attempt: state.attempt });

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled()),
                outcome = op(context.with_attempt(state.attempt)) => outcome,
            };
            let error = match outcome {
                Ok(value) => {
                    log_transition(context, AttemptState::Succeeded { attempt: state.attempt });
                    return Ok(value);
                }
                Err(error) => error,
            };

            match self.decide(&error, &state, Utc::now()) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        operation = context.operation(),
                        request_id = %context.request_id(),
                        attempt = state.attempt,
                        category = %error.category(),
                        status = ?error.status(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "attempt failed, retrying"
                    );
                    log_transition(
                        context,
                        AttemptState::Waiting {
                            attempt: state.attempt,
                            delay,
                        },
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(cancelled()),
                        () = tokio::time::sleep(delay) => {}
                    }
                    state = state.next(&error);
                }
                RetryDecision::GiveUp { reason } => {
                    debug!(
                        operation = context.operation(),
                        %reason,
                        category = %error.category(),
                        "giving up"
                    );
                    log_transition(context, AttemptState::Failed { attempt: state.attempt });
                    return Err(Error::Api(error));
                }
            }
        }
    }
}

fn log_transition(context: &RequestContext, state: AttemptState) {
    debug!(
        operation = context.operation(),
        request_id = %context.request_id(),
        ?state,
        "retry state"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use crate::cancel::cancel_pair;
    use crate::transport::{ApiResponse, HttpMethod};

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy::from_config(
            &RetryConfig::new(retries).without_jitter(),
            &ThrottleConfig::default(),
        )
        .unwrap()
    }

    fn context(max_retries: u32) -> RequestContext {
        RequestContext::new(HttpMethod::Get, "get_repository", "/repos/o/r", &json!({}), max_retries)
    }

    fn error(status: u16) -> ApiError {
        ApiError::from_response(context(3), &ApiResponse::new(status, ""))
    }

    fn at(attempt: u32) -> RetryState {
        RetryState {
            attempt,
            ..RetryState::default()
        }
    }

    fn primary_limit(retry_after: Option<&str>) -> ApiError {
        let mut response = ApiResponse::new(403, r#"{"message": "API rate limit exceeded"}"#)
            .with_header("X-RateLimit-Remaining", "0");
        if let Some(secs) = retry_after {
            response = response.with_header("Retry-After", secs);
        }
        ApiError::from_response(context(3), &response)
    }

    fn secondary_limit() -> ApiError {
        let response =
            ApiResponse::new(403, r#"{"message": "You have exceeded a secondary rate limit"}"#);
        ApiError::from_response(context(3), &response)
    }

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500))
            .without_jitter();
        let delays: Vec<_> = (1..=5).map(|n| backoff.delay(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn jitter_adds_at_most_a_quarter() {
        let backoff = Backoff::new(Duration::from_millis(400), Duration::from_secs(10));
        for _ in 0..100 {
            let delay = backoff.delay(1);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[test]
    fn server_errors_retry_until_budget_is_spent() {
        let policy = policy(2);
        let err = error(503);
        assert_eq!(
            policy.decide(&err, &at(1), Utc::now()),
            RetryDecision::Retry {
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            policy.decide(&err, &at(2), Utc::now()),
            RetryDecision::Retry {
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(
            policy.decide(&err, &at(3), Utc::now()),
            RetryDecision::GiveUp {
                reason: GiveUpReason::Exhausted
            }
        );
    }

    #[test]
    fn zero_retries_never_retry() {
        assert_eq!(
            policy(0).decide(&error(500), &at(1), Utc::now()),
            RetryDecision::GiveUp {
                reason: GiveUpReason::Exhausted
            }
        );
    }

    #[test]
    fn client_errors_short_circuit() {
        for status in [400, 401, 403, 404, 422] {
            assert_eq!(
                policy(5).decide(&error(status), &at(1), Utc::now()),
                RetryDecision::GiveUp {
                    reason: GiveUpReason::NotRetryable
                },
                "status {status}"
            );
        }
    }

    #[test]
    fn do_not_retry_exempts_retryable_statuses() {
        let policy = RetryPolicy::from_config(
            &RetryConfig::new(5).with_do_not_retry(["503"]),
            &ThrottleConfig::default(),
        )
        .unwrap();
        assert_eq!(
            policy.decide(&error(503), &at(1), Utc::now()),
            RetryDecision::GiveUp {
                reason: GiveUpReason::DoNotRetryStatus
            }
        );
        assert!(matches!(
            policy.decide(&error(502), &at(1), Utc::now()),
            RetryDecision::Retry { .. }
        ));
    }

    #[test]
    fn primary_limit_waits_for_retry_after() {
        assert_eq!(
            policy(3).decide(&primary_limit(Some("60")), &at(1), Utc::now()),
            RetryDecision::Retry {
                delay: Duration::from_secs(60)
            }
        );
    }

    #[test]
    fn primary_limit_falls_back_to_reset_then_default() {
        let now = Utc::now();
        let reset = now + chrono::Duration::seconds(120);
        let response = ApiResponse::new(403, "")
            .with_header("X-RateLimit-Remaining", "0")
            .with_header("X-RateLimit-Reset", reset.timestamp().to_string());
        let err = ApiError::from_response(context(3), &response);
        let RetryDecision::Retry { delay } = policy(3).decide(&err, &at(1), now) else {
            panic!("expected a retry");
        };
        assert!(delay <= Duration::from_secs(120));
        assert!(delay >= Duration::from_secs(119));

        assert_eq!(
            policy(3).decide(&primary_limit(None), &at(1), now),
            RetryDecision::Retry {
                delay: Duration::from_secs(60)
            }
        );
    }

    #[test]
    fn reset_in_the_past_waits_at_least_a_second() {
        let now = Utc::now();
        let response = ApiResponse::new(429, "")
            .with_header("X-RateLimit-Remaining", "0")
            .with_header("X-RateLimit-Reset", (now.timestamp() - 30).to_string());
        let err = ApiError::from_response(context(3), &response);
        assert_eq!(
            policy(3).decide(&err, &at(1), now),
            RetryDecision::Retry {
                delay: MIN_RESET_WAIT
            }
        );
    }

    #[test]
    fn rate_limit_respects_throttle_settings() {
        let disabled =
            RetryPolicy::from_config(&RetryConfig::new(3), &ThrottleConfig::disabled()).unwrap();
        assert_eq!(
            disabled.decide(&primary_limit(Some("1")), &at(1), Utc::now()),
            RetryDecision::GiveUp {
                reason: GiveUpReason::ThrottleDisabled
            }
        );

        assert_eq!(
            policy(3).decide(&primary_limit(Some("3600")), &at(1), Utc::now()),
            RetryDecision::GiveUp {
                reason: GiveUpReason::WaitTooLong
            }
        );
    }

    #[test]
    fn secondary_limit_has_its_own_budget() {
        let policy = policy(5);
        let err = secondary_limit();
        assert_eq!(
            policy.decide(&err, &at(1), Utc::now()),
            RetryDecision::Retry {
                delay: Duration::from_secs(60)
            }
        );

        let after_one = at(1).next(&err);
        assert_eq!(after_one.secondary_retries, 1);
        assert_eq!(
            policy.decide(&err, &after_one, Utc::now()),
            RetryDecision::GiveUp {
                reason: GiveUpReason::SecondaryExhausted
            }
        );

        // A primary limit is unaffected by the spent secondary budget.
        assert!(matches!(
            policy.decide(&primary_limit(Some("5")), &after_one, Utc::now()),
            RetryDecision::Retry { .. }
        ));
    }

    #[test]
    fn primary_limits_only_advance_the_attempt() {
        let after_primary = at(1).next(&primary_limit(Some("5")));
        assert_eq!(after_primary.attempt, 2);
        assert_eq!(after_primary.secondary_retries, 0);

        let after_server_error = after_primary.next(&error(503));
        assert_eq!(after_server_error.attempt, 3);
        assert_eq!(after_server_error.secondary_retries, 0);
    }

    #[derive(Debug)]
    struct Veto;

    impl ThrottleHandler for Veto {
        fn on_secondary_rate_limit(&self, _event: &RateLimitEvent) -> bool {
            false
        }
    }

    #[test]
    fn handler_can_veto() {
        let policy = policy(3).with_handler(Arc::new(Veto));
        assert_eq!(
            policy.decide(&secondary_limit(), &at(1), Utc::now()),
            RetryDecision::GiveUp {
                reason: GiveUpReason::Vetoed
            }
        );
        assert!(matches!(
            policy.decide(&primary_limit(Some("1")), &at(1), Utc::now()),
            RetryDecision::Retry { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn run_makes_n_plus_one_attempts() {
        let policy = policy(3);
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy
            .run(&context(3), &CancelSignal::never(), |ctx| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(ApiError::from_response(ctx, &ApiResponse::new(503, ""))) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let err = result.unwrap_err();
        let api = err.as_api().unwrap();
        assert_eq!(api.attempt(), 4);
        assert_eq!(api.status(), Some(503));
    }

    #[tokio::test(start_paused = true)]
    async fn run_returns_first_success() {
        let calls = AtomicU32::new(0);
        let value = policy(3)
            .run(&context(3), &CancelSignal::never(), |ctx| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ApiError::network(ctx, "reset"))
                    } else {
                        Ok(ctx.attempt())
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retrying() {
        let (handle, signal) = cancel_pair();
        let calls = AtomicU32::new(0);
        let policy = policy(3);

        let ctx3 = context(3);
        let run = policy.run(&ctx3, &signal, |ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(ApiError::network(ctx, "reset")) }
        });
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            handle.cancel();
        };
        let (result, ()) = tokio::join!(run, cancel);

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_attempt() {
        let (handle, signal) = cancel_pair();
        handle.cancel();
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy(3)
            .run(&context(3), &signal, |_ctx| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
