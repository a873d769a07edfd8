//! Per-call request context attached to classified errors.
//!
//! A [`RequestContext`] records what was being attempted (method, operation,
//! path, parameters) and where in the retry sequence the call was. It is
//! immutable: [`RequestContext::with_attempt`] derives a copy for the next
//! attempt. Parameters are redacted on construction, so a context can be
//! logged or serialised without leaking credentials.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::transport::HttpMethod;

/// Replacement written in place of sensitive parameter values.
pub const REDACTED: &str = "[REDACTED]";

/// Key fragments that mark a parameter as sensitive.
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "token",
    "authorization",
    "password",
    "secret",
    "private_key",
    "privatekey",
    "credential",
    "cookie",
];

/// Diagnostic information about one outbound call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestContext {
    request_id: Uuid,
    method: HttpMethod,
    operation: String,
    path: String,
    params: Value,
    timestamp: DateTime<Utc>,
    attempt: u32,
    max_retries: u32,
}

impl RequestContext {
    /// Creates the context for the first attempt of a call.
    ///
    /// `params` are redacted before being stored.
    #[must_use]
    pub fn new(
        method: HttpMethod,
        operation: impl Into<String>,
        path: impl Into<String>,
        params: &Value,
        max_retries: u32,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method,
            operation: operation.into(),
            path: path.into(),
            params: redact(params),
            timestamp: Utc::now(),
            attempt: 1,
            max_retries,
        }
    }

    /// Returns a copy describing the given (1-based) attempt.
    #[must_use]
    pub fn with_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }

    /// Correlation id shared by every attempt of the call.
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// High-level operation name, e.g. `get_repository`.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Redacted call parameters.
    #[must_use]
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// When the call was first attempted.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// 1-based attempt number.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Returns `true` if a parameter name suggests a credential.
#[must_use]
pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| key.contains(fragment))
}

/// Replaces the values of sensitive keys, at any depth, with [`REDACTED`].
#[must_use]
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    let item = if is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact(item)
                    };
                    (key.clone(), item)
                })
                .collect::<Map<_, _>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}
