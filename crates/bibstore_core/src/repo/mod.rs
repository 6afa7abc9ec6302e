//! Repository layer: versioned object stores over SQLite.
//!
//! # Responsibility
//! - Keep SQL details inside the persistence boundary.
//! - Enforce optimistic concurrency (compare-and-swap on version) and
//!   tombstone bookkeeping for every object type.
//!
//! # Invariants
//! - Write paths validate before any SQL mutation and run inside a
//!   [`crate::txn::UnitOfWork`].
//! - Read paths reject invalid persisted state instead of masking it.
//! - Errors carry a stable `code()` and an HTTP-like `status()`.

use crate::db::DbError;
use crate::model::key::ObjectKey;
use crate::model::library::{LibraryId, LibraryKey, UserId};
use crate::model::object::ObjectType;
use crate::model::ValidationError;
use crate::txn::TransactionError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod collection_repo;
pub mod fulltext_repo;
pub mod item_repo;
pub mod library_repo;
pub mod object_repo;
pub mod relation_repo;
pub mod search_repo;
pub mod tag_repo;
pub mod version_clock;

pub use collection_repo::CollectionStore;
pub use item_repo::ItemStore;
pub use library_repo::LibraryRepo;
pub use object_repo::{ObjectStore, SaveOutcome};
pub use search_repo::SearchStore;
pub use tag_repo::TagStore;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    Db(DbError),
    NotFound {
        object_type: ObjectType,
        key: LibraryKey,
    },
    /// Stale expected version. `target` names the object or library.
    VersionConflict {
        target: String,
        expected: i64,
        actual: i64,
    },
    LibraryNotFound(LibraryId),
    LibraryAccessDenied {
        library_id: LibraryId,
        user_id: UserId,
    },
    Transaction(TransactionError),
    Serialization(serde_json::Error),
    InvalidData(String),
}

impl RepoError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Db(_) => "db_error",
            Self::NotFound { .. } => "not_found",
            Self::VersionConflict { .. } => "version_conflict",
            Self::LibraryNotFound(_) => "library_not_found",
            Self::LibraryAccessDenied { .. } => "library_access_denied",
            Self::Transaction(_) => "transaction_error",
            Self::Serialization(_) => "serialization_error",
            Self::InvalidData(_) => "invalid_data",
        }
    }

    /// HTTP-like outcome for API and sync responses.
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::LibraryAccessDenied { .. } => 403,
            Self::NotFound { .. } | Self::LibraryNotFound(_) => 404,
            Self::VersionConflict { .. } => 412,
            Self::Db(_) | Self::Transaction(_) | Self::Serialization(_) | Self::InvalidData(_) => {
                500
            }
        }
    }

    pub(crate) fn not_found(object_type: ObjectType, library_id: LibraryId, key: &ObjectKey) -> Self {
        Self::NotFound {
            object_type,
            key: LibraryKey::new(library_id, key.clone()),
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { object_type, key } => write!(f, "{object_type} not found: {key}"),
            Self::VersionConflict {
                target,
                expected,
                actual,
            } => write!(f, "{target} has version {actual}, expected {expected}"),
            Self::LibraryNotFound(id) => write!(f, "library not found: {id}"),
            Self::LibraryAccessDenied {
                library_id,
                user_id,
            } => write!(f, "user {user_id} lacks access to library {library_id}"),
            Self::Transaction(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "object serialization failed: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Transaction(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::NotFound { .. }
            | Self::VersionConflict { .. }
            | Self::LibraryNotFound(_)
            | Self::LibraryAccessDenied { .. }
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<TransactionError> for RepoError {
    fn from(value: TransactionError) -> Self {
        Self::Transaction(value)
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

#[cfg(test)]
mod tests {
    use super::RepoError;
    use crate::model::ValidationError;
    use crate::txn::TransactionError;

    #[test]
    fn status_codes_follow_error_taxonomy() {
        let validation = RepoError::from(ValidationError::EmptyName("tag"));
        assert_eq!((validation.code(), validation.status()), ("validation_error", 400));

        let denied = RepoError::LibraryAccessDenied {
            library_id: 1,
            user_id: 2,
        };
        assert_eq!(denied.status(), 403);

        let conflict = RepoError::VersionConflict {
            target: "item 1/ABCD2345".to_string(),
            expected: 3,
            actual: 5,
        };
        assert_eq!((conflict.code(), conflict.status()), ("version_conflict", 412));
        assert_eq!(conflict.to_string(), "item 1/ABCD2345 has version 5, expected 3");

        let contract = RepoError::from(TransactionError::NoTransaction);
        assert_eq!(contract.status(), 500);
    }
}
