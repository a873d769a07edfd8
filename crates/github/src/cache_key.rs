//! Deterministic cache keys.
//!
//! A key has the shape `namespace:METHOD:path:params`. Parameters are
//! serialised canonically: object keys are sorted at every nesting level,
//! arrays keep their order, and `null` (including absent optional values,
//! which serialise to `null`) is written as the literal `null`. When the
//! canonical parameter string is longer than the hash threshold it is
//! replaced by a base-36 digest, keeping the prefix readable. Parameters
//! that carry a credential (see [`crate::context::is_sensitive_key`]) are
//! always hashed, so keys are safe to log.
//!
//! # Examples
//!
//! ```
//! use contribmatch_github::cache_key::cache_key;
//! use serde_json::json;
//!
//! let a = cache_key("get", "/search/repositories", &json!({"q": "rust", "page": 1}));
//! let b = cache_key("GET", "/search/repositories", &json!({"page": 1, "q": "rust"}));
//! assert_eq!(a, b);
//! assert_eq!(a, r#"github:GET:/search/repositories:{"page":1,"q":"rust"}"#);
//! ```

use std::fmt::Write as _;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::context::redact;

/// Namespace used by [`cache_key`].
pub const DEFAULT_NAMESPACE: &str = "github";

/// Parameter strings longer than this are hashed.
pub const DEFAULT_HASH_THRESHOLD: usize = 100;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Builds cache keys with a fixed namespace and hash threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyBuilder {
    namespace: String,
    hash_threshold: usize,
}

impl Default for CacheKeyBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl CacheKeyBuilder {
    /// Creates a builder for the given namespace with the default threshold.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            hash_threshold: DEFAULT_HASH_THRESHOLD,
        }
    }

    /// Replaces the length above which parameters are hashed.
    #[must_use]
    pub fn with_hash_threshold(mut self, hash_threshold: usize) -> Self {
        self.hash_threshold = hash_threshold;
        self
    }

    /// Returns the namespace prefix.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Builds the key for a method, path, and parameter value.
    #[must_use]
    pub fn build(&self, method: &str, path: &str, params: &Value) -> String {
        let serialized = canonical_json(params);
        let params = if serialized.len() > self.hash_threshold || carries_secret(params) {
            hash_base36(&serialized)
        } else {
            serialized
        };
        format!(
            "{}:{}:{}:{}",
            self.namespace,
            method.to_ascii_uppercase(),
            path,
            params
        )
    }

    /// Builds a glob matching every key for `path` under any parameters.
    ///
    /// `method` may be `*` to match every method.
    #[must_use]
    pub fn pattern(&self, method: &str, path: &str) -> String {
        format!(
            "{}:{}:{}:*",
            self.namespace,
            method.to_ascii_uppercase(),
            path
        )
    }
}

/// Builds a key in the default namespace with the default threshold.
#[must_use]
pub fn cache_key(method: &str, path: &str, params: &Value) -> String {
    CacheKeyBuilder::default().build(method, path, params)
}

/// Returns `true` if redaction would change `params`.
fn carries_secret(params: &Value) -> bool {
    redact(params) != *params
}

/// Serialises a JSON value with object keys sorted at every level.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Display on a JSON string writes it quoted and escaped
                let _ = write!(out, "{}", Value::String(key.clone()));
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

/// Hashes `input` to a short base-36 string (128 bits of SHA-256).
fn hash_base36(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    let mut n = u128::from_be_bytes(bytes);

    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::with_capacity(25);
    while n > 0 {
        digits.push(BASE36_DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}
