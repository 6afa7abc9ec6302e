//! Full-text search over item bodies.
//!
//! # Responsibility
//! - Define the `FulltextIndex` seam and its error type.
//! - Keep the index eventually consistent with item deletions through
//!   [`cleanup::FulltextCleanupObserver`].
//!
//! # Invariants
//! - The index is a secondary copy; the relational `item_fulltext` row is
//!   the record of truth for versions.

use crate::db::DbError;
use crate::model::key::ObjectKey;
use crate::model::library::LibraryId;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod cleanup;
pub mod fts;

pub use cleanup::FulltextCleanupObserver;
pub use fts::SqliteFulltextIndex;

/// Result type for search APIs.
pub type SearchResult<T> = Result<T, SearchError>;

#[derive(Debug)]
pub enum SearchError {
    /// Query text cannot be turned into an FTS5 expression.
    InvalidQuery {
        query: String,
        message: String,
    },
    Db(DbError),
    InvalidData(String),
}

impl Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuery { query, message } => {
                write!(f, "invalid full-text query `{query}`: {message}")
            }
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid search row: {message}"),
        }
    }
}

impl Error for SearchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidQuery { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for SearchError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SearchError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Single match returned by [`FulltextIndex::search`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulltextHit {
    pub library_id: LibraryId,
    pub item_key: ObjectKey,
    pub snippet: String,
}

/// Searchable copy of item full text.
pub trait FulltextIndex: Send + Sync {
    /// Replaces any previous content for the item.
    fn index(&self, library_id: LibraryId, item_key: &ObjectKey, content: &str)
        -> SearchResult<()>;

    /// Returns whether an entry was removed.
    fn remove(&self, library_id: LibraryId, item_key: &ObjectKey) -> SearchResult<bool>;

    /// Phrase-prefix search within one library. Blank queries return nothing.
    fn search(
        &self,
        library_id: LibraryId,
        query: &str,
        limit: u32,
    ) -> SearchResult<Vec<FulltextHit>>;
}
