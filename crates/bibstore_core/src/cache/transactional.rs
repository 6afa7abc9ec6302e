//! Transaction-scoped write queuing over a non-transactional cache.
//!
//! # Responsibility
//! - Defer visible cache mutation until the enclosing database transaction
//!   commits, and drop it when the transaction rolls back.
//! - Make queued values visible to reads of the same context only.
//!
//! # Invariants
//! - Only one level of queuing: `begin` while active is a contract violation.
//! - Within a transaction the last queued operation per key wins, except
//!   `add`, which never replaces a queued `set`/`add`.
//! - Commit applies operations in the order keys were first touched.

use super::CacheBackend;
use crate::txn::TransactionError;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Idle,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingOp {
    Set { value: String, ttl: Option<Duration> },
    Add { value: String, ttl: Option<Duration> },
    Delete,
}

#[derive(Debug, Default)]
struct WriteQueue {
    order: Vec<String>,
    ops: HashMap<String, PendingOp>,
}

impl WriteQueue {
    fn get(&self, key: &str) -> Option<&PendingOp> {
        self.ops.get(key)
    }

    fn put(&mut self, key: &str, op: PendingOp) {
        if !self.ops.contains_key(key) {
            self.order.push(key.to_string());
        }
        self.ops.insert(key.to_string(), op);
    }

    fn len(&self) -> usize {
        self.ops.len()
    }

    fn drain(&mut self) -> Vec<(String, PendingOp)> {
        let mut ops = std::mem::take(&mut self.ops);
        std::mem::take(&mut self.order)
            .into_iter()
            .filter_map(|key| ops.remove(&key).map(|op| (key, op)))
            .collect()
    }
}

/// Request-scoped cache handle.
///
/// Outside a transaction every call goes straight to the backend.
pub struct TransactionalCache {
    backend: Arc<dyn CacheBackend>,
    queue: Option<WriteQueue>,
}

impl TransactionalCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            queue: None,
        }
    }

    pub fn state(&self) -> CacheState {
        if self.queue.is_some() {
            CacheState::Active
        } else {
            CacheState::Idle
        }
    }

    pub fn is_active(&self) -> bool {
        self.queue.is_some()
    }

    /// Number of keys with a queued operation.
    pub fn pending_len(&self) -> usize {
        self.queue.as_ref().map_or(0, WriteQueue::len)
    }

    pub fn begin(&mut self) -> Result<(), TransactionError> {
        if self.queue.is_some() {
            return Err(TransactionError::NestedTransaction);
        }
        self.queue = Some(WriteQueue::default());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(op) = self.queue.as_ref().and_then(|queue| queue.get(key)) {
            return queued_value(op);
        }
        self.backend.get(key)
    }

    /// Multi-key read with per-key shadowing; missing keys are omitted.
    pub fn get_multi(&self, keys: &[&str]) -> HashMap<String, String> {
        let Some(queue) = self.queue.as_ref() else {
            return self.backend.get_multi(keys);
        };

        let mut found = HashMap::new();
        let mut unqueued = Vec::new();
        for key in keys {
            match queue.get(key) {
                Some(op) => {
                    if let Some(value) = queued_value(op) {
                        found.insert((*key).to_string(), value);
                    }
                }
                None => unqueued.push(*key),
            }
        }
        if !unqueued.is_empty() {
            found.extend(self.backend.get_multi(&unqueued));
        }
        found
    }

    pub fn set(&mut self, key: &str, value: String, ttl: Option<Duration>) {
        match self.queue.as_mut() {
            Some(queue) => queue.put(key, PendingOp::Set { value, ttl }),
            None => self.backend.set(key, value, ttl),
        }
    }

    /// Stores `value` only if `key` has no value in this context's view.
    pub fn add(&mut self, key: &str, value: String, ttl: Option<Duration>) -> bool {
        let Some(queue) = self.queue.as_mut() else {
            return self.backend.add(key, value, ttl);
        };

        match queue.get(key) {
            Some(PendingOp::Set { .. }) | Some(PendingOp::Add { .. }) => false,
            // Deleted earlier in this transaction: absent in our view, and
            // the backend value must still be replaced on commit.
            Some(PendingOp::Delete) => {
                queue.put(key, PendingOp::Set { value, ttl });
                true
            }
            None => {
                if self.backend.get(key).is_some() {
                    return false;
                }
                queue.put(key, PendingOp::Add { value, ttl });
                true
            }
        }
    }

    pub fn delete(&mut self, key: &str) {
        match self.queue.as_mut() {
            Some(queue) => queue.put(key, PendingOp::Delete),
            None => {
                self.backend.delete(key);
            }
        }
    }

    /// Applies every queued operation to the backend and returns to idle.
    pub fn commit(&mut self) -> Result<usize, TransactionError> {
        let Some(mut queue) = self.queue.take() else {
            return Err(TransactionError::NoTransaction);
        };

        let ops = queue.drain();
        let applied = ops.len();
        for (key, op) in ops {
            match op {
                PendingOp::Set { value, ttl } => self.backend.set(&key, value, ttl),
                PendingOp::Add { value, ttl } => {
                    self.backend.add(&key, value, ttl);
                }
                PendingOp::Delete => {
                    self.backend.delete(&key);
                }
            }
        }
        debug!("event=cache_commit module=cache status=ok applied={applied}");
        Ok(applied)
    }

    /// Drops queued operations without touching the backend.
    ///
    /// With `discard_only` the transaction stays active with an empty queue;
    /// otherwise the cache returns to idle. Rolling back while idle is a no-op.
    pub fn rollback(&mut self, discard_only: bool) {
        let discarded = self.pending_len();
        if discard_only {
            if self.queue.is_some() {
                self.queue = Some(WriteQueue::default());
            }
        } else {
            self.queue = None;
        }
        if discarded > 0 {
            debug!("event=cache_rollback module=cache status=ok discarded={discarded}");
        }
    }
}

fn queued_value(op: &PendingOp) -> Option<String> {
    match op {
        PendingOp::Set { value, .. } | PendingOp::Add { value, .. } => Some(value.clone()),
        PendingOp::Delete => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheState, TransactionalCache};
    use crate::cache::{CacheBackend, MemoryCache};
    use crate::txn::TransactionError;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Backend double that records every mutation it receives.
    #[derive(Default)]
    struct RecordingBackend {
        values: Mutex<HashMap<String, String>>,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingBackend {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    impl CacheBackend for RecordingBackend {
        fn get(&self, key: &str) -> Option<String> {
            self.values.lock().expect("values lock").get(key).cloned()
        }

        fn set(&self, key: &str, value: String, _ttl: Option<Duration>) {
            self.calls.lock().expect("calls lock").push(format!("set:{key}"));
            self.values
                .lock()
                .expect("values lock")
                .insert(key.to_string(), value);
        }

        fn add(&self, key: &str, value: String, _ttl: Option<Duration>) -> bool {
            self.calls.lock().expect("calls lock").push(format!("add:{key}"));
            let mut values = self.values.lock().expect("values lock");
            if values.contains_key(key) {
                return false;
            }
            values.insert(key.to_string(), value);
            true
        }

        fn delete(&self, key: &str) -> bool {
            self.calls.lock().expect("calls lock").push(format!("delete:{key}"));
            self.values.lock().expect("values lock").remove(key).is_some()
        }
    }

    fn memory_cache() -> (Arc<MemoryCache>, TransactionalCache) {
        let backend = Arc::new(MemoryCache::new(1_000));
        let cache = TransactionalCache::new(backend.clone());
        (backend, cache)
    }

    #[test]
    fn queued_values_shadow_backend_until_rollback() {
        let (backend, mut cache) = memory_cache();
        backend.set("K", "before".to_string(), None);

        cache.begin().expect("begin");
        cache.set("K", "a".to_string(), None);
        cache.set("K", "b".to_string(), None);
        assert_eq!(cache.get("K").as_deref(), Some("b"));
        assert_eq!(backend.get("K").as_deref(), Some("before"));

        cache.rollback(false);
        assert_eq!(cache.state(), CacheState::Idle);
        assert_eq!(cache.get("K").as_deref(), Some("before"));
    }

    #[test]
    fn commit_makes_final_values_visible() {
        let (backend, mut cache) = memory_cache();
        backend.set("gone", "x".to_string(), None);

        cache.begin().expect("begin");
        cache.set("K", "a".to_string(), None);
        cache.delete("gone");
        assert_eq!(cache.get("gone"), None);
        assert_eq!(backend.get("gone").as_deref(), Some("x"));

        assert_eq!(cache.commit().expect("commit"), 2);
        assert_eq!(backend.get("K").as_deref(), Some("a"));
        assert_eq!(backend.get("gone"), None);
    }

    #[test]
    fn begin_twice_is_rejected() {
        let (_, mut cache) = memory_cache();
        cache.begin().expect("first begin");
        assert_eq!(cache.begin(), Err(TransactionError::NestedTransaction));
    }

    #[test]
    fn commit_without_begin_is_rejected() {
        let (_, mut cache) = memory_cache();
        assert_eq!(cache.commit(), Err(TransactionError::NoTransaction));
    }

    #[test]
    fn add_respects_existing_and_queued_values() {
        let (backend, mut cache) = memory_cache();
        backend.set("stored", "old".to_string(), None);

        cache.begin().expect("begin");
        assert!(!cache.add("stored", "new".to_string(), None));

        cache.set("queued", "first".to_string(), None);
        assert!(!cache.add("queued", "second".to_string(), None));
        assert_eq!(cache.get("queued").as_deref(), Some("first"));

        assert!(cache.add("fresh", "v".to_string(), None));
        assert!(!cache.add("fresh", "w".to_string(), None));
        assert_eq!(cache.get("fresh").as_deref(), Some("v"));

        cache.commit().expect("commit");
        assert_eq!(backend.get("stored").as_deref(), Some("old"));
        assert_eq!(backend.get("fresh").as_deref(), Some("v"));
    }

    #[test]
    fn add_after_queued_delete_replaces_backend_value() {
        let (backend, mut cache) = memory_cache();
        backend.set("K", "stale".to_string(), None);

        cache.begin().expect("begin");
        cache.delete("K");
        assert!(cache.add("K", "fresh".to_string(), None));
        assert_eq!(cache.get("K").as_deref(), Some("fresh"));
        cache.commit().expect("commit");

        assert_eq!(backend.get("K").as_deref(), Some("fresh"));
    }

    #[test]
    fn outside_transaction_writes_go_straight_to_backend() {
        let (backend, mut cache) = memory_cache();
        cache.set("K", "v".to_string(), None);
        assert_eq!(backend.get("K").as_deref(), Some("v"));
        cache.delete("K");
        assert_eq!(backend.get("K"), None);
    }

    #[test]
    fn get_multi_merges_queue_with_backend() {
        let (backend, mut cache) = memory_cache();
        backend.set("a", "backend-a".to_string(), None);
        backend.set("b", "backend-b".to_string(), None);
        backend.set("c", "backend-c".to_string(), None);

        cache.begin().expect("begin");
        cache.set("a", "queued-a".to_string(), None);
        cache.delete("b");

        let found = cache.get_multi(&["a", "b", "c", "d"]);
        assert_eq!(found.len(), 2);
        assert_eq!(found.get("a").map(String::as_str), Some("queued-a"));
        assert_eq!(found.get("c").map(String::as_str), Some("backend-c"));
    }

    #[test]
    fn commit_applies_in_first_touched_order() {
        let backend = Arc::new(RecordingBackend::default());
        let mut cache = TransactionalCache::new(backend.clone());

        cache.begin().expect("begin");
        cache.set("z", "1".to_string(), None);
        cache.delete("a");
        cache.set("m", "2".to_string(), None);
        cache.set("z", "3".to_string(), None);
        assert!(backend.calls().is_empty());

        cache.commit().expect("commit");
        assert_eq!(backend.calls(), vec!["set:z", "delete:a", "set:m"]);
        assert_eq!(backend.get("z").as_deref(), Some("3"));
    }

    #[test]
    fn discard_only_rollback_keeps_transaction_open() {
        let backend = Arc::new(RecordingBackend::default());
        let mut cache = TransactionalCache::new(backend.clone());

        cache.begin().expect("begin");
        cache.set("K", "dropped".to_string(), None);
        cache.rollback(true);
        assert_eq!(cache.state(), CacheState::Active);
        assert_eq!(cache.pending_len(), 0);

        cache.set("K", "kept".to_string(), None);
        cache.commit().expect("commit");
        assert_eq!(backend.calls(), vec!["set:K"]);
        assert_eq!(backend.get("K").as_deref(), Some("kept"));
    }
}
