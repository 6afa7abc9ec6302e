//! Key/value cache layer.
//!
//! # Responsibility
//! - Define the backing-store contract (`CacheBackend`): get/set/add/delete
//!   with per-entry TTL, no transactional semantics assumed.
//! - Provide the in-process backend (`MemoryCache`).
//! - Layer transaction-scoped write queuing on top (`TransactionalCache`).
//!
//! # Invariants
//! - The backend is shared process-wide (`Arc<dyn CacheBackend>`); write
//!   queues are owned by one request context and never shared.

use std::collections::HashMap;
use std::time::Duration;

mod memory;
mod transactional;

pub use memory::MemoryCache;
pub use transactional::{CacheState, TransactionalCache};

/// Backing key/value store used by [`TransactionalCache`].
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Returns only keys that have a value.
    fn get_multi(&self, keys: &[&str]) -> HashMap<String, String> {
        keys.iter()
            .filter_map(|key| self.get(key).map(|value| ((*key).to_string(), value)))
            .collect()
    }

    fn set(&self, key: &str, value: String, ttl: Option<Duration>);

    /// Stores `value` only when `key` has none. Returns whether it stored.
    fn add(&self, key: &str, value: String, ttl: Option<Duration>) -> bool;

    /// Returns whether a value was removed.
    fn delete(&self, key: &str) -> bool;
}

/// Cache key for one versioned object.
pub fn object_cache_key(object_type: &str, library_id: i64, key: &str) -> String {
    format!("{object_type}_{library_id}_{key}")
}

/// Cache key for a library version counter.
pub fn library_version_cache_key(library_id: i64) -> String {
    format!("libraryVersion_{library_id}")
}
