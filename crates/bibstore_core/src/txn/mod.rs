//! Request context and unit of work.
//!
//! # Responsibility
//! - Bundle one connection, one cache write queue and one notification batch
//!   per request (`Session`).
//! - Treat the SQLite transaction, the cache queue and the notification batch
//!   as a single unit (`UnitOfWork`).
//!
//! # Invariants
//! - Commit order is relational store, then cache, then notifications.
//! - Dropping an uncommitted unit of work (error path, early return, unwind)
//!   rolls back all three.
//! - Each touched library is bumped at most once per unit of work.

use crate::cache::{library_version_cache_key, CacheBackend, MemoryCache, TransactionalCache};
use crate::config::CoreConfig;
use crate::model::library::{LibraryId, LibraryKey};
use crate::notify::{NotificationEvent, Notifier, NotifierRegistry, NotifyType};
use crate::repo::version_clock;
use crate::repo::RepoResult;
use log::{debug, info};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

/// Programming-contract violations around transaction boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionError {
    /// Operation requires an active transaction.
    NoTransaction,
    /// `begin` called while a transaction is already active.
    NestedTransaction,
}

impl Display for TransactionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTransaction => write!(f, "no transaction is active"),
            Self::NestedTransaction => write!(f, "a transaction is already active"),
        }
    }
}

impl Error for TransactionError {}

/// Process-wide collaborators shared by every session.
#[derive(Clone)]
pub struct CoreServices {
    pub cache: Arc<dyn CacheBackend>,
    pub registry: Arc<NotifierRegistry>,
    pub config: CoreConfig,
}

impl CoreServices {
    /// In-process cache sized from `config`, empty observer registry.
    pub fn new(config: CoreConfig) -> Self {
        let cache = Arc::new(MemoryCache::new(config.cache_capacity));
        Self::with_backend(config, cache)
    }

    pub fn with_backend(config: CoreConfig, cache: Arc<dyn CacheBackend>) -> Self {
        Self {
            cache,
            registry: Arc::new(NotifierRegistry::new()),
            config,
        }
    }

    pub fn session<'conn>(&self, conn: &'conn mut Connection) -> Session<'conn> {
        Session::new(conn, self)
    }
}

/// Read access shared by sessions and units of work.
pub trait DataContext {
    fn conn(&self) -> &Connection;
    fn cache_mut(&mut self) -> &mut TransactionalCache;
    fn config(&self) -> &CoreConfig;
}

/// One request's view of the stores.
pub struct Session<'conn> {
    conn: &'conn mut Connection,
    cache: TransactionalCache,
    notifier: Notifier,
    config: CoreConfig,
}

impl<'conn> Session<'conn> {
    pub fn new(conn: &'conn mut Connection, services: &CoreServices) -> Self {
        Self {
            conn,
            cache: TransactionalCache::new(Arc::clone(&services.cache)),
            notifier: Notifier::new(Arc::clone(&services.registry)),
            config: services.config.clone(),
        }
    }

    /// Opens an `IMMEDIATE` transaction together with cache and notifier
    /// batching.
    pub fn begin(&mut self) -> RepoResult<UnitOfWork<'_>> {
        self.cache.begin()?;
        let mut scope = ScopeGuard {
            cache: &mut self.cache,
            notifier: &mut self.notifier,
            armed: true,
        };
        scope.notifier.begin()?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        Ok(UnitOfWork {
            tx,
            scope,
            config: &self.config,
            versions: BTreeMap::new(),
            started_at: Instant::now(),
        })
    }

    /// Runs `f` in a unit of work, committing on `Ok` and rolling back on `Err`.
    pub fn transaction<T, F>(&mut self, f: F) -> RepoResult<T>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> RepoResult<T>,
    {
        let mut uow = self.begin()?;
        let value = f(&mut uow)?;
        uow.commit()?;
        Ok(value)
    }

    pub fn notifier_mut(&mut self) -> &mut Notifier {
        &mut self.notifier
    }

    pub fn cache(&self) -> &TransactionalCache {
        &self.cache
    }
}

impl DataContext for Session<'_> {
    fn conn(&self) -> &Connection {
        &*self.conn
    }

    fn cache_mut(&mut self) -> &mut TransactionalCache {
        &mut self.cache
    }

    fn config(&self) -> &CoreConfig {
        &self.config
    }
}

/// Rolls back cache and notifier unless disarmed by a successful commit.
struct ScopeGuard<'s> {
    cache: &'s mut TransactionalCache,
    notifier: &'s mut Notifier,
    armed: bool,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let discarded = self.cache.pending_len();
        self.cache.rollback(false);
        self.notifier.reset();
        info!("event=uow_rollback module=txn status=ok discarded_cache_ops={discarded}");
    }
}

/// Active transaction spanning the relational store, the cache queue and the
/// notification batch.
pub struct UnitOfWork<'s> {
    tx: Transaction<'s>,
    scope: ScopeGuard<'s>,
    config: &'s CoreConfig,
    versions: BTreeMap<LibraryId, i64>,
    started_at: Instant,
}

impl UnitOfWork<'_> {
    /// Version assigned to every change this unit of work makes in
    /// `library_id`. The first call bumps the library counter; later calls
    /// return the same value.
    pub fn library_version(&mut self, library_id: LibraryId) -> RepoResult<i64> {
        if let Some(version) = self.versions.get(&library_id) {
            return Ok(*version);
        }

        let version = version_clock::next_version(&self.tx, library_id)?;
        self.versions.insert(library_id, version);
        // Cache queues flush after the write lock is released; the counter
        // is only ever invalidated, never cached by value.
        self.scope
            .cache
            .delete(&library_version_cache_key(library_id));
        debug!("event=library_bump module=txn status=ok library_id={library_id} version={version}");
        Ok(version)
    }

    /// Libraries bumped so far, with their assigned versions.
    pub fn touched_libraries(&self) -> &BTreeMap<LibraryId, i64> {
        &self.versions
    }

    pub fn trigger(
        &mut self,
        event: NotificationEvent,
        notify_type: NotifyType,
        keys: impl IntoIterator<Item = LibraryKey>,
    ) {
        self.scope.notifier.trigger(event, notify_type, keys);
    }

    pub fn commit(self) -> RepoResult<()> {
        let UnitOfWork {
            tx,
            mut scope,
            versions,
            started_at,
            ..
        } = self;

        tx.commit()?;
        scope.armed = false;
        let cache_result = scope.cache.commit();
        let notify_result = scope.notifier.commit();
        let cache_ops = cache_result?;
        let notifications = notify_result?;

        info!(
            "event=uow_commit module=txn status=ok libraries={} cache_ops={cache_ops} notifications={notifications} duration_ms={}",
            versions.len(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Explicit rollback; dropping the unit of work has the same effect.
    pub fn rollback(self) -> RepoResult<()> {
        let UnitOfWork { tx, scope, .. } = self;
        let result = tx.rollback();
        drop(scope);
        result?;
        Ok(())
    }
}

impl DataContext for UnitOfWork<'_> {
    fn conn(&self) -> &Connection {
        &self.tx
    }

    fn cache_mut(&mut self) -> &mut TransactionalCache {
        &mut *self.scope.cache
    }

    fn config(&self) -> &CoreConfig {
        self.config
    }
}
