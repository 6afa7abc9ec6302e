//! In-process change notification bus.
//!
//! # Responsibility
//! - Keep the process-wide observer registry (`NotifierRegistry`).
//! - Batch request-scoped triggers (`Notifier`) so each observer sees one
//!   call per `(event, type)` pair per unit of work.
//!
//! # Invariants
//! - Observers registered for one type fire in registration order.
//! - Observers are invoked outside the registry lock, so they may register
//!   or unregister other observers.
//! - A batch is flushed by `commit` or dropped by `reset`, never both.

use crate::model::library::LibraryKey;
use crate::model::object::ObjectType;
use crate::txn::TransactionError;
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NotificationEvent {
    Add,
    Modify,
    Delete,
}

impl NotificationEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }
}

impl Display for NotificationEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel an observer subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NotifyType {
    Item,
    Collection,
    Search,
    Tag,
    Fulltext,
}

impl NotifyType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Collection => "collection",
            Self::Search => "search",
            Self::Tag => "tag",
            Self::Fulltext => "fulltext",
        }
    }
}

impl From<ObjectType> for NotifyType {
    fn from(value: ObjectType) -> Self {
        match value {
            ObjectType::Item => Self::Item,
            ObjectType::Collection => Self::Collection,
            ObjectType::Search => Self::Search,
            ObjectType::Tag => Self::Tag,
        }
    }
}

impl Display for NotifyType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of change notifications.
pub trait Observer: Send + Sync {
    fn notify(
        &self,
        event: NotificationEvent,
        notify_type: NotifyType,
        keys: &BTreeSet<LibraryKey>,
    );
}

/// Opaque registration id returned by [`NotifierRegistry::register_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

struct Registration {
    notify_type: NotifyType,
    observer: Arc<dyn Observer>,
}

/// Process-wide observer registry, shared through `Arc`.
#[derive(Default)]
pub struct NotifierRegistry {
    next_handle: AtomicU64,
    observers: RwLock<BTreeMap<u64, Registration>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_observer(
        &self,
        observer: Arc<dyn Observer>,
        notify_type: NotifyType,
    ) -> ObserverHandle {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Registration {
                    notify_type,
                    observer,
                },
            );
        debug!("event=observer_register module=notify status=ok handle={id} type={notify_type}");
        ObserverHandle(id)
    }

    /// Returns `false` when the handle was not registered.
    pub fn unregister_observer(&self, handle: ObserverHandle) -> bool {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.0)
            .is_some()
    }

    /// Drops every registration (process shutdown, test teardown).
    pub fn clear(&self) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn observer_count(&self, notify_type: NotifyType) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|registration| registration.notify_type == notify_type)
            .count()
    }

    /// Invokes every observer registered for `notify_type`.
    pub fn dispatch(
        &self,
        event: NotificationEvent,
        notify_type: NotifyType,
        keys: &BTreeSet<LibraryKey>,
    ) {
        let targets: Vec<Arc<dyn Observer>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|registration| registration.notify_type == notify_type)
            .map(|registration| Arc::clone(&registration.observer))
            .collect();

        debug!(
            "event=notify_dispatch module=notify status=ok notification={event} type={notify_type} keys={} observers={}",
            keys.len(),
            targets.len()
        );
        for observer in targets {
            observer.notify(event, notify_type, keys);
        }
    }
}

#[derive(Default)]
struct PendingBatch {
    order: Vec<(NotificationEvent, NotifyType)>,
    keys: HashMap<(NotificationEvent, NotifyType), BTreeSet<LibraryKey>>,
}

/// Request-scoped trigger front end with transactional batching.
pub struct Notifier {
    registry: Arc<NotifierRegistry>,
    pending: Option<PendingBatch>,
}

impl Notifier {
    pub fn new(registry: Arc<NotifierRegistry>) -> Self {
        Self {
            registry,
            pending: None,
        }
    }

    pub fn registry(&self) -> &Arc<NotifierRegistry> {
        &self.registry
    }

    pub fn is_batching(&self) -> bool {
        self.pending.is_some()
    }

    pub fn begin(&mut self) -> Result<(), TransactionError> {
        if self.pending.is_some() {
            return Err(TransactionError::NestedTransaction);
        }
        self.pending = Some(PendingBatch::default());
        Ok(())
    }

    /// Fires immediately when idle; merges into the batch otherwise.
    pub fn trigger(
        &mut self,
        event: NotificationEvent,
        notify_type: NotifyType,
        keys: impl IntoIterator<Item = LibraryKey>,
    ) {
        let keys: BTreeSet<LibraryKey> = keys.into_iter().collect();
        if keys.is_empty() {
            return;
        }

        let Some(batch) = self.pending.as_mut() else {
            self.registry.dispatch(event, notify_type, &keys);
            return;
        };

        let pair = (event, notify_type);
        match batch.keys.get_mut(&pair) {
            Some(existing) => existing.extend(keys),
            None => {
                batch.order.push(pair);
                batch.keys.insert(pair, keys);
            }
        }
    }

    /// Flushes one call per `(event, type)` pair in first-trigger order.
    pub fn commit(&mut self) -> Result<usize, TransactionError> {
        let Some(mut batch) = self.pending.take() else {
            return Err(TransactionError::NoTransaction);
        };

        let mut flushed = 0;
        for pair in batch.order {
            if let Some(keys) = batch.keys.remove(&pair) {
                self.registry.dispatch(pair.0, pair.1, &keys);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Drops the pending batch without notifying anyone. Idempotent.
    pub fn reset(&mut self) {
        self.pending = None;
    }
}
