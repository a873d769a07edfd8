//! Cache storage for GitHub API responses.
//!
//! [`CacheStore`] is the seam the client caches through; any backend
//! (in-process map, Redis, ...) can sit behind it. [`MemoryCache`] is the
//! default: a bounded in-process map with per-entry TTL and
//! least-recently-used eviction.
//!
//! Values are stored as raw [`serde_json::Value`] so the typed layer can
//! re-deserialise them into whatever model the call expects.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use contribmatch_github::{CacheStore, MemoryCache};
//! use serde_json::json;
//!
//! # async fn example() {
//! let cache = MemoryCache::new(100);
//! cache.set("github:GET:/user:{}", json!({"login": "octocat"}), Duration::from_secs(60)).await;
//! assert_eq!(cache.get("github:GET:/user:{}").await, Some(json!({"login": "octocat"})));
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
}

impl CacheStats {
    /// Fraction of lookups that were hits, or 0 when nothing was looked up.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Key/value storage with per-entry expiry.
///
/// Implementations must be safe to share between concurrent calls. Storage
/// failures are reported as misses (`get`) or `false` (`set`) and never
/// surface as errors to API callers.
#[async_trait]
pub trait CacheStore: Send + Sync + fmt::Debug {
    /// Returns the live value for `key`. Expired entries read as absent.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Stores `value` for `ttl`. Returns whether the value was stored.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> bool;

    /// Removes one entry. Returns whether it existed.
    async fn delete(&self, key: &str) -> bool;

    /// Lists live keys, optionally filtered by a `*` glob pattern.
    async fn keys(&self, pattern: Option<&str>) -> Vec<String>;

    /// Removes every entry whose key matches the glob pattern.
    async fn invalidate_pattern(&self, pattern: &str) -> usize;

    /// Removes every entry.
    async fn clear(&self);

    /// Number of stored entries, including any not yet purged.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Current counters.
    fn stats(&self) -> CacheStats;
}

/// Compiles a glob where `*` matches any run of characters and every other
/// character matches itself.
///
/// Returns `None` (and logs) if the pattern cannot be compiled.
#[must_use]
pub fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    match Regex::new(&format!("^{body}$")) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!(pattern, error = %e, "invalid cache key pattern");
            None
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
    last_access: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Entry>,
    tick: u64,
}

impl Entries {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, entry| !entry.is_expired(now));
        before - self.map.len()
    }

    fn evict_lru(&mut self) -> Option<String> {
        let key = self
            .map
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone())?;
        self.map.remove(&key);
        Some(key)
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

/// Bounded in-process [`CacheStore`].
///
/// Expired entries are dropped lazily on read and actively when the cache
/// is full. When no expired entry can be purged, the least recently used
/// entry is evicted.
pub struct MemoryCache {
    max_size: usize,
    entries: Mutex<Entries>,
    counters: Counters,
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("max_size", &self.max_size)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl MemoryCache {
    /// Creates a cache holding at most `max_size` entries (at least one).
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            entries: Mutex::new(Entries::default()),
            counters: Counters::default(),
        }
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Drops every expired entry now. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let purged = self.lock().purge_expired(Instant::now());
        self.counters
            .expirations
            .fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut entries = self.lock();
        let tick = entries.next_tick();

        match entries.map.get_mut(key) {
            None => {
                Self::bump(&self.counters.misses);
                return None;
            }
            Some(entry) if !entry.is_expired(now) => {
                entry.last_access = tick;
                Self::bump(&self.counters.hits);
                trace!(key, "cache hit");
                return Some(entry.value.clone());
            }
            Some(_) => {}
        }

        entries.map.remove(key);
        Self::bump(&self.counters.expirations);
        Self::bump(&self.counters.misses);
        trace!(key, "cache entry expired");
        None
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> bool {
        if ttl.is_zero() {
            debug!(key, "refusing to cache with zero ttl");
            return false;
        }

        let now = Instant::now();
        let mut entries = self.lock();
        if !entries.map.contains_key(key) && entries.map.len() >= self.max_size {
            let purged = entries.purge_expired(now);
            self.counters
                .expirations
                .fetch_add(purged as u64, Ordering::Relaxed);
            if entries.map.len() >= self.max_size
                && let Some(evicted) = entries.evict_lru()
            {
                Self::bump(&self.counters.evictions);
                debug!(key = %evicted, "evicted least recently used cache entry");
            }
        }

        let tick = entries.next_tick();
        entries.map.insert(
            key.to_string(),
            Entry {
                value,
                inserted_at: now,
                ttl,
                last_access: tick,
            },
        );
        Self::bump(&self.counters.sets);
        true
    }

    async fn delete(&self, key: &str) -> bool {
        let removed = self.lock().map.remove(key).is_some();
        if removed {
            Self::bump(&self.counters.invalidations);
        }
        removed
    }

    async fn keys(&self, pattern: Option<&str>) -> Vec<String> {
        let matcher = match pattern {
            Some(pattern) => match glob_to_regex(pattern) {
                Some(regex) => Some(regex),
                None => return Vec::new(),
            },
            None => None,
        };

        let now = Instant::now();
        let entries = self.lock();
        let mut keys: Vec<String> = entries
            .map
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key)
            .filter(|key| matcher.as_ref().is_none_or(|regex| regex.is_match(key)))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let Some(regex) = glob_to_regex(pattern) else {
            return 0;
        };
        let mut entries = self.lock();
        let before = entries.map.len();
        entries.map.retain(|key, _| !regex.is_match(key));
        let removed = before - entries.map.len();
        self.counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        debug!(pattern, removed, "invalidated cache entries");
        removed
    }

    async fn clear(&self) {
        let mut entries = self.lock();
        let removed = entries.map.len();
        entries.map.clear();
        self.counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
    }

    async fn len(&self) -> usize {
        self.lock().map.len()
    }

    fn stats(&self) -> CacheStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CacheStats {
            hits: load(&self.counters.hits),
            misses: load(&self.counters.misses),
            sets: load(&self.counters.sets),
            evictions: load(&self.counters.evictions),
            expirations: load(&self.counters.expirations),
            invalidations: load(&self.counters.invalidations),
        }
    }
}
