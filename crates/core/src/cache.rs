//! Fingerprinted TTL + LRU cache for detection results.
//!
//! Keys combine a SHA-256 digest of the payload bytes with the canonical
//! encoding of the normalized options, so identical images requested with
//! different options never collide. Expired entries are purged lazily on
//! every operation — no background sweeper thread.
//!
//! Reads return a deep copy with `cached = true`; the stored entry is
//! never handed out by reference, so one caller can never mutate another
//! caller's cached view.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::options::DetectionOptions;
use crate::types::DetectionResult;

/// Compute the cache key for a payload + options pair.
pub fn fingerprint(payload: &[u8], options: &DetectionOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    format!("{:x}:{}", hasher.finalize(), options.cache_key_fragment())
}

struct CacheEntry {
    result: DetectionResult,
    expires_at: Instant,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Oldest key at the front, newest at the back. Maintained in access
    /// order so the front is always the least-recently-used entry.
    order: VecDeque<String>,
}

/// Bounded, time-expiring store for computed detection results.
///
/// A TTL of zero disables caching entirely: `put` is a no-op and `get`
/// always misses. This is the operational escape hatch for deployments
/// that must never serve stale results.
pub struct ResultCache {
    inner: Mutex<CacheInner>,
    max_items: usize,
    ttl: Duration,
}

impl ResultCache {
    /// Create a cache holding at most `max_items` entries for `ttl` each.
    ///
    /// # Panics
    /// Panics if `max_items == 0`.
    pub fn new(max_items: usize, ttl: Duration) -> Self {
        assert!(max_items > 0, "cache capacity must be > 0");
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            max_items,
            ttl,
        }
    }

    /// Look up a result, promoting the entry to MRU position on a hit.
    ///
    /// The returned copy always carries `cached = true`.
    pub fn get(&self, key: &str) -> Option<DetectionResult> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<DetectionResult> {
        if self.ttl.is_zero() {
            return None;
        }
        let mut inner = self.lock();
        purge_expired(&mut inner, now);
        if !inner.entries.contains_key(key) {
            return None;
        }
        inner.order.retain(|k| k != key);
        inner.order.push_back(key.to_owned());
        inner.entries.get(key).map(|entry| {
            let mut copy = entry.result.clone();
            copy.cached = true;
            copy
        })
    }

    /// Insert or overwrite a result, evicting from the LRU end while the
    /// cache exceeds its capacity.
    pub fn put(&self, key: &str, result: &DetectionResult) {
        self.put_at(key, result, Instant::now());
    }

    fn put_at(&self, key: &str, result: &DetectionResult, now: Instant) {
        if self.ttl.is_zero() {
            return;
        }
        let mut inner = self.lock();
        purge_expired(&mut inner, now);

        if inner.entries.contains_key(key) {
            inner.order.retain(|k| k != key);
        }
        inner.order.push_back(key.to_owned());
        inner.entries.insert(
            key.to_owned(),
            CacheEntry {
                result: result.clone(),
                expires_at: now + self.ttl,
            },
        );

        while inner.entries.len() > self.max_items {
            match inner.order.pop_front() {
                Some(evicted) => {
                    inner.entries.remove(&evicted);
                }
                None => break,
            }
        }
    }

    /// Drop every entry, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let removed = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        removed
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        self.len_at(Instant::now())
    }

    fn len_at(&self, now: Instant) -> usize {
        let mut inner = self.lock();
        purge_expired(&mut inner, now);
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn purge_expired(inner: &mut CacheInner, now: Instant) {
    if inner.entries.is_empty() {
        return;
    }
    inner.entries.retain(|_, entry| entry.expires_at > now);
    let entries = &inner.entries;
    inner.order.retain(|key| entries.contains_key(key));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(tag: &str) -> DetectionResult {
        DetectionResult {
            tags: vec![tag.to_string()],
            detections: Vec::new(),
            total_detections: 0,
            inference_ms: 1.0,
            cached: false,
        }
    }

    fn cache(max_items: usize, ttl_secs: u64) -> ResultCache {
        ResultCache::new(max_items, Duration::from_secs(ttl_secs))
    }

    // ── fingerprint ──────────────────────────────────────────────────────

    #[test]
    fn fingerprint_is_deterministic() {
        let options = DetectionOptions::default();
        assert_eq!(
            fingerprint(b"payload", &options),
            fingerprint(b"payload", &options)
        );
    }

    #[test]
    fn fingerprint_differs_by_payload_and_options() {
        let options = DetectionOptions::default();
        assert_ne!(
            fingerprint(b"payload-a", &options),
            fingerprint(b"payload-b", &options)
        );
        let other = DetectionOptions {
            max_tags: 7,
            ..DetectionOptions::default()
        };
        assert_ne!(fingerprint(b"payload", &options), fingerprint(b"payload", &other));
    }

    #[test]
    fn fingerprint_equal_for_cache_equivalent_options() {
        let a = DetectionOptions {
            include_labels: vec!["Dog".to_string(), "cat".to_string()],
            ..DetectionOptions::default()
        };
        let b = DetectionOptions {
            include_labels: vec!["cat".to_string(), "dog".to_string()],
            ..DetectionOptions::default()
        };
        assert_eq!(fingerprint(b"same", &a), fingerprint(b"same", &b));
    }

    // ── get / put ────────────────────────────────────────────────────────

    #[test]
    fn hit_after_put_carries_cached_flag() {
        let cache = cache(8, 300);
        cache.put("k1", &result("cat"));
        let hit = cache.get("k1").unwrap();
        assert!(hit.cached);
        assert_eq!(hit.tags, vec!["cat"]);
    }

    #[test]
    fn miss_for_unknown_key() {
        let cache = cache(8, 300);
        assert!(cache.get("missing").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn stored_entry_keeps_original_cached_flag() {
        let cache = cache(8, 300);
        cache.put("k1", &result("cat"));
        // Two consecutive reads both see cached=true without the stored
        // entry itself being mutated into an inconsistent state.
        assert!(cache.get("k1").unwrap().cached);
        assert!(cache.get("k1").unwrap().cached);
    }

    #[test]
    fn returned_copy_is_independent_of_the_store() {
        let cache = cache(8, 300);
        cache.put("k1", &result("cat"));
        let mut first = cache.get("k1").unwrap();
        first.tags.push("mutated".to_string());
        let second = cache.get("k1").unwrap();
        assert_eq!(second.tags, vec!["cat"]);
    }

    #[test]
    fn overwrite_does_not_grow_len() {
        let cache = cache(4, 300);
        cache.put("k1", &result("cat"));
        cache.put("k1", &result("dog"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k1").unwrap().tags, vec!["dog"]);
    }

    // ── TTL ──────────────────────────────────────────────────────────────

    #[test]
    fn zero_ttl_disables_caching() {
        let cache = cache(8, 0);
        cache.put("k1", &result("cat"));
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = cache(8, 300);
        let start = Instant::now();
        cache.put_at("k1", &result("cat"), start);
        assert!(cache.get_at("k1", start + Duration::from_secs(299)).is_some());
        assert!(cache.get_at("k1", start + Duration::from_secs(301)).is_none());
        assert_eq!(cache.len_at(start + Duration::from_secs(301)), 0);
    }

    // ── LRU eviction ─────────────────────────────────────────────────────

    #[test]
    fn never_exceeds_capacity_and_evicts_lru_first() {
        let cache = cache(2, 300);
        cache.put("a", &result("a"));
        cache.put("b", &result("b"));
        cache.put("c", &result("c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none(), "LRU entry 'a' should be evicted");
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn access_promotes_to_mru_preventing_eviction() {
        let cache = cache(2, 300);
        cache.put("a", &result("a"));
        cache.put("b", &result("b"));
        // Promote "a" to MRU; "b" becomes LRU.
        cache.get("a");
        cache.put("c", &result("c"));
        assert!(cache.get("b").is_none(), "'b' should be evicted");
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    // ── clear ────────────────────────────────────────────────────────────

    #[test]
    fn clear_reports_removed_count() {
        let cache = cache(8, 300);
        cache.put("a", &result("a"));
        cache.put("b", &result("b"));
        assert_eq!(cache.clear(), 2);
        assert_eq!(cache.clear(), 0);
        assert!(cache.is_empty());
    }
}
