//! Consistency core for a multi-tenant bibliographic store.
//! This crate is the single source of truth for versioning, sync and
//! cache/notification invariants.

pub mod cache;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;
pub mod search;
pub mod service;
pub mod storage;
pub mod txn;

pub use cache::{CacheBackend, MemoryCache, TransactionalCache};
pub use config::{default_log_level, ConfigError, CoreConfig, LoggingConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{init_logging, logging_status, LoggingError};
pub use model::collection::Collection;
pub use model::item::{Item, ItemTag};
pub use model::key::ObjectKey;
pub use model::library::{Actor, Library, LibraryId, LibraryKey, LibraryRole, LibraryType};
pub use model::object::{ObjectType, VersionedObject};
pub use model::saved_search::{SavedSearch, SearchCondition};
pub use model::tag::Tag;
pub use model::ValidationError;
pub use notify::{NotificationEvent, NotifierRegistry, NotifyType, Observer, ObserverHandle};
pub use repo::{
    CollectionStore, ItemStore, LibraryRepo, ObjectStore, RepoError, RepoResult, SaveOutcome,
    SearchStore, TagStore,
};
pub use search::{FulltextCleanupObserver, FulltextIndex, SearchError, SqliteFulltextIndex};
pub use service::{FulltextService, SyncService, UploadProcessor, UploadReport};
pub use storage::{BlobStore, FsBlobStore};
pub use txn::{CoreServices, DataContext, Session, TransactionError, UnitOfWork};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
