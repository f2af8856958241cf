//! In-memory TTL cache for upstream responses. Correctness rests on the
//! expiry check at read time; the background sweeper only bounds memory.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Cache key: `operation|canonical_json(params)`. Params come in a BTreeMap
/// so key order is stable regardless of caller construction order.
pub fn cache_key(operation: &str, params: &BTreeMap<String, String>) -> String {
    let canonical = serde_json::to_string(params).unwrap_or_default();
    format!("{operation}|{canonical}")
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

pub struct TtlCache {
    inner: Mutex<Inner>,
}

impl TtlCache {
    pub fn new() -> Self {
        TtlCache {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Returns the cached value, or `None` on miss. An entry whose expiry
    /// has passed is removed on read and reported as a miss; an expired
    /// entry is never observable.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                let value = entry.value.clone();
                inner.hits += 1;
                Some(value)
            }
            Some(_) => {
                inner.entries.remove(key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Last-writer-wins insert with a caller-supplied TTL.
    pub fn put(&self, key: &str, value: Value, ttl: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Remove all expired entries; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.expires_at > now);
        before - inner.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            size: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: inner.hits as f64 / (lookups.max(1)) as f64,
        }
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the periodic sweeper. Exits at the next tick after shutdown.
pub fn spawn_sweeper(
    cache: Arc<TtlCache>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cache.sweep();
                    if removed > 0 {
                        tracing::debug!(removed, "cache sweep");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_before_expiry_hits_after_expiry_misses() {
        let cache = TtlCache::new();
        cache.put("k", json!({"a": 1}), Duration::from_millis(40));

        assert_eq!(cache.get("k"), Some(json!({"a": 1})));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get("k"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let cache = TtlCache::new();
        cache.put("short", json!(1), Duration::from_millis(10));
        cache.put("long", json!(2), Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.stats().size, 1);
        assert_eq!(cache.get("long"), Some(json!(2)));
    }

    #[test]
    fn key_is_stable_under_param_order() {
        let mut a = BTreeMap::new();
        a.insert("agentID".to_string(), "A1".to_string());
        a.insert("week".to_string(), "0".to_string());

        let mut b = BTreeMap::new();
        b.insert("week".to_string(), "0".to_string());
        b.insert("agentID".to_string(), "A1".to_string());

        assert_eq!(cache_key("getPending", &a), cache_key("getPending", &b));
    }

    #[test]
    fn put_overwrites_last_writer_wins() {
        let cache = TtlCache::new();
        cache.put("k", json!(1), Duration::from_secs(60));
        cache.put("k", json!(2), Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(json!(2)));
    }
}
