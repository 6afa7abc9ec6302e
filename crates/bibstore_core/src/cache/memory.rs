//! In-process cache backend on `moka`.

use super::CacheBackend;
use moka::sync::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CachedValue {
    data: String,
    ttl: Option<Duration>,
}

/// Applies the TTL stored with each entry on create and on overwrite.
struct PerEntryExpiry;

impl Expiry<String, CachedValue> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// Bounded in-memory backend with per-entry expiry.
pub struct MemoryCache {
    inner: Cache<String, CachedValue>,
}

impl MemoryCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(PerEntryExpiry)
                .build(),
        }
    }

    /// Number of live entries (approximate until pending maintenance runs).
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).map(|value| value.data)
    }

    fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        self.inner
            .insert(key.to_string(), CachedValue { data: value, ttl });
    }

    fn add(&self, key: &str, value: String, ttl: Option<Duration>) -> bool {
        self.inner
            .entry(key.to_string())
            .or_insert_with(|| CachedValue { data: value, ttl })
            .is_fresh()
    }

    fn delete(&self, key: &str) -> bool {
        self.inner.remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryCache;
    use crate::cache::CacheBackend;
    use std::time::Duration;

    #[test]
    fn add_does_not_overwrite_existing_values() {
        let cache = MemoryCache::new(100);
        assert!(cache.add("k", "first".to_string(), None));
        assert!(!cache.add("k", "second".to_string(), None));
        assert_eq!(cache.get("k").as_deref(), Some("first"));
    }

    #[test]
    fn delete_reports_presence() {
        let cache = MemoryCache::new(100);
        cache.set("k", "v".to_string(), None);
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn entries_expire_after_their_ttl() {
        let cache = MemoryCache::new(100);
        cache.set("short", "v".to_string(), Some(Duration::from_millis(20)));
        cache.set("long", "v".to_string(), None);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get("short"), None);
        assert_eq!(cache.get("long").as_deref(), Some("v"));
    }

    #[test]
    fn get_multi_skips_missing_keys() {
        let cache = MemoryCache::new(100);
        cache.set("a", "1".to_string(), None);
        let found = cache.get_multi(&["a", "b"]);
        assert_eq!(found.len(), 1);
        assert_eq!(found.get("a").map(String::as_str), Some("1"));
    }
}
