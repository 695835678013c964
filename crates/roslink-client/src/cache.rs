//! Short-TTL response cache.
//!
//! Memoizes idempotent read commands only. Entries expire via TTL and are
//! evicted least-recently-used at capacity. Mutation commands never
//! invalidate entries: staleness is bounded by the TTL, not by strong
//! consistency.

use roslink_common::protocol::CommandClass;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::CacheConfig;

/// Fingerprint of a command and its parameter set.
///
/// `serde_json` maps are sorted, so serializing the params yields a stable
/// canonical form.
pub fn fingerprint(command: &str, params: &Value) -> String {
    format!("{command}|{params}")
}

struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
    /// Recency sequence; higher means more recently used.
    last_access: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    access_seq: u64,
    hits: u64,
    misses: u64,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// TTL + LRU response cache.
///
/// Thread-safe behind a single mutex; lookups copy the value out so the
/// lock is never held across caller code.
pub struct ResponseCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// TTL for a command class, from configuration.
    pub fn ttl_for(&self, class: CommandClass) -> Option<Duration> {
        match class {
            CommandClass::SystemInfo => Some(self.config.system_info_ttl),
            CommandClass::Listing => Some(self.config.listing_ttl),
            CommandClass::Mutation => None,
        }
    }

    /// Returns the cached value for `key`, or `None` on miss or expiry.
    ///
    /// An expired entry is removed on the spot; it is never returned.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.access_seq += 1;
        let seq = inner.access_seq;

        match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_access = seq;
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

    /// Inserts a value, evicting the least-recently-used entry if the cache
    /// is at capacity.
    pub fn put(&self, key: String, value: Value, ttl: Duration) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.access_seq += 1;
        let seq = inner.access_seq;

        // Drop expired entries first; they are free capacity.
        inner.entries.retain(|_, e| !e.is_expired(now));

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.config.capacity {
            if let Some(lru_key) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&lru_key);
            }
        }

        inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                ttl,
                last_access: seq,
            },
        );
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    /// Drops all entries. Used on shutdown and in tests.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_with_capacity(capacity: usize) -> ResponseCache {
        ResponseCache::new(CacheConfig {
            capacity,
            ..CacheConfig::default()
        })
    }

    #[test]
    fn test_put_then_get() {
        let cache = cache_with_capacity(10);
        cache.put("k".into(), json!([1, 2, 3]), Duration::from_secs(10));
        assert_eq!(cache.get("k"), Some(json!([1, 2, 3])));
    }

    #[test]
    fn test_expired_entry_is_never_returned() {
        let cache = cache_with_capacity(10);
        cache.put("k".into(), json!("v"), Duration::from_millis(0));
        assert_eq!(cache.get("k"), None);
        // The expired entry was removed, not just hidden.
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_ttl_expiry_over_time() {
        let cache = cache_with_capacity(10);
        cache.put("k".into(), json!("v"), Duration::from_millis(30));
        assert_eq!(cache.get("k"), Some(json!("v")));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = cache_with_capacity(2);
        cache.put("a".into(), json!(1), Duration::from_secs(60));
        cache.put("b".into(), json!(2), Duration::from_secs(60));

        // Touch "a" so "b" is the least recently used.
        assert!(cache.get("a").is_some());

        cache.put("c".into(), json!(3), Duration::from_secs(60));
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().entries, 2);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = cache_with_capacity(2);
        cache.put("a".into(), json!(1), Duration::from_secs(60));
        cache.put("b".into(), json!(2), Duration::from_secs(60));
        cache.put("a".into(), json!(10), Duration::from_secs(60));
        assert_eq!(cache.get("a"), Some(json!(10)));
        assert_eq!(cache.get("b"), Some(json!(2)));
    }

    #[test]
    fn test_hit_miss_counters() {
        let cache = cache_with_capacity(4);
        cache.put("k".into(), json!(1), Duration::from_secs(60));
        cache.get("k");
        cache.get("missing");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_fingerprint_distinguishes_params() {
        let a = fingerprint("/user/print", &json!({"filter": "x"}));
        let b = fingerprint("/user/print", &json!({"filter": "y"}));
        let c = fingerprint("/queue/print", &json!({"filter": "x"}));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, fingerprint("/user/print", &json!({"filter": "x"})));
    }

    #[test]
    fn test_ttl_per_class() {
        let cache = ResponseCache::new(CacheConfig::default());
        assert!(cache.ttl_for(CommandClass::SystemInfo).unwrap()
            > cache.ttl_for(CommandClass::Listing).unwrap());
        assert!(cache.ttl_for(CommandClass::Mutation).is_none());
    }
}
