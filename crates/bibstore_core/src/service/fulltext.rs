//! Item full text across the relational store, blob store and search index.
//!
//! # Responsibility
//! - Commit the version-stamped `item_fulltext` row, then write the body to
//!   the blob store and the search index.
//! - Surface failures of the secondary writes with the committed version.
//!
//! # Invariants
//! - The relational row is committed before any external write starts.
//! - A failed blob or index write is never rolled back into the relational
//!   store; the caller sees `FulltextError::Blob` / `FulltextError::Index`.

use crate::model::key::ObjectKey;
use crate::model::library::{Actor, LibraryId};
use crate::repo::fulltext_repo::{get_fulltext, get_newer_fulltext, upsert_fulltext, FulltextRecord};
use crate::repo::{LibraryRepo, RepoError};
use crate::search::{FulltextHit, FulltextIndex, SearchError};
use crate::storage::{BlobError, BlobStore};
use crate::txn::{DataContext, Session};
use log::{error, info};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug)]
pub enum FulltextError {
    Repo(RepoError),
    /// Row committed at `version`, blob write failed.
    Blob { version: i64, source: BlobError },
    /// Row and blob committed at `version`, index write failed.
    Index { version: i64, source: SearchError },
    Search(SearchError),
}

impl FulltextError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Repo(err) => err.code(),
            Self::Blob { .. } => "blob_store_error",
            Self::Index { .. } => "search_index_error",
            Self::Search(SearchError::InvalidQuery { .. }) => "invalid_query",
            Self::Search(_) => "search_error",
        }
    }
}

impl Display for FulltextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::Blob { version, source } => {
                write!(f, "full text stored at version {version} but blob write failed: {source}")
            }
            Self::Index { version, source } => {
                write!(f, "full text stored at version {version} but indexing failed: {source}")
            }
            Self::Search(err) => write!(f, "{err}"),
        }
    }
}

impl Error for FulltextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Blob { source, .. } => Some(source),
            Self::Index { source, .. } => Some(source),
            Self::Search(err) => Some(err),
        }
    }
}

impl From<RepoError> for FulltextError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<SearchError> for FulltextError {
    fn from(value: SearchError) -> Self {
        Self::Search(value)
    }
}

/// Stored full text of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFulltext {
    pub record: FulltextRecord,
    /// `None` when the row exists but the blob is missing.
    pub content: Option<String>,
}

#[derive(Clone)]
pub struct FulltextService {
    blobs: Arc<dyn BlobStore>,
    index: Arc<dyn FulltextIndex>,
}

impl FulltextService {
    pub fn new(blobs: Arc<dyn BlobStore>, index: Arc<dyn FulltextIndex>) -> Self {
        Self { blobs, index }
    }

    /// Stores `content` for an existing item and returns the new version.
    ///
    /// `total_chars` is the size of the source document when only part of
    /// it was extracted; it defaults to the length of `content`.
    pub fn set_item_fulltext(
        &self,
        session: &mut Session<'_>,
        actor: Actor,
        library_id: LibraryId,
        item_key: &ObjectKey,
        content: &str,
        total_chars: Option<i64>,
    ) -> Result<i64, FulltextError> {
        let started_at = Instant::now();
        let indexed_chars = i64::try_from(content.chars().count()).unwrap_or(i64::MAX);
        let total_chars = total_chars.unwrap_or(indexed_chars).max(indexed_chars);

        let version = session.transaction(|uow| {
            LibraryRepo::new(uow.conn()).require_write(library_id, actor)?;
            upsert_fulltext(uow, library_id, item_key, indexed_chars, total_chars)
        })?;

        if let Err(source) = self.blobs.put(library_id, item_key, content.as_bytes()) {
            error!(
                "event=fulltext_store module=service status=error stage=blob library_id={library_id} key={item_key} version={version} error={source}"
            );
            return Err(FulltextError::Blob { version, source });
        }
        if let Err(source) = self.index.index(library_id, item_key, content) {
            error!(
                "event=fulltext_store module=service status=error stage=index library_id={library_id} key={item_key} version={version} error={source}"
            );
            return Err(FulltextError::Index { version, source });
        }

        info!(
            "event=fulltext_store module=service status=ok library_id={library_id} key={item_key} version={version} indexed_chars={indexed_chars} duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(version)
    }

    pub fn get_item_fulltext(
        &self,
        session: &Session<'_>,
        actor: Actor,
        library_id: LibraryId,
        item_key: &ObjectKey,
    ) -> Result<Option<ItemFulltext>, FulltextError> {
        LibraryRepo::new(session.conn()).require_read(library_id, actor)?;
        let Some(record) = get_fulltext(session.conn(), library_id, item_key)? else {
            return Ok(None);
        };

        let content = match self.blobs.get(library_id, item_key) {
            Ok(Some(body)) => Some(String::from_utf8(body).map_err(|err| {
                RepoError::InvalidData(format!(
                    "full text blob for {library_id}/{item_key} is not utf-8: {err}"
                ))
            })?),
            Ok(None) => None,
            Err(source) => {
                return Err(FulltextError::Blob {
                    version: record.version,
                    source,
                })
            }
        };
        Ok(Some(ItemFulltext { record, content }))
    }

    pub fn get_newer_fulltext(
        &self,
        session: &Session<'_>,
        actor: Actor,
        library_id: LibraryId,
        since: i64,
    ) -> Result<BTreeMap<ObjectKey, i64>, FulltextError> {
        LibraryRepo::new(session.conn()).require_read(library_id, actor)?;
        Ok(get_newer_fulltext(session.conn(), library_id, since)?)
    }

    pub fn search(
        &self,
        session: &Session<'_>,
        actor: Actor,
        library_id: LibraryId,
        query: &str,
        limit: u32,
    ) -> Result<Vec<FulltextHit>, FulltextError> {
        LibraryRepo::new(session.conn()).require_read(library_id, actor)?;
        Ok(self.index.search(library_id, query, limit)?)
    }
}
