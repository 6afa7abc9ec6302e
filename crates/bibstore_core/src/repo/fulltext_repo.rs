//! Version-stamped full-text metadata rows.
//!
//! The body lives in the blob store and the search index; this table is the
//! relational record that incremental sync reads.

use crate::model::key::ObjectKey;
use crate::model::library::{LibraryId, LibraryKey};
use crate::model::object::ObjectType;
use crate::notify::{NotificationEvent, NotifyType};
use crate::repo::object_repo::parse_key_column;
use crate::repo::{RepoError, RepoResult};
use crate::txn::{DataContext, UnitOfWork};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FulltextRecord {
    #[serde(rename = "libraryID")]
    pub library_id: LibraryId,
    pub item_key: ObjectKey,
    pub indexed_chars: i64,
    pub total_chars: i64,
    pub version: i64,
}

/// Inserts or replaces the row for a live item and returns its new version.
pub fn upsert_fulltext(
    uow: &mut UnitOfWork<'_>,
    library_id: LibraryId,
    item_key: &ObjectKey,
    indexed_chars: i64,
    total_chars: i64,
) -> RepoResult<i64> {
    let exists = uow
        .conn()
        .query_row(
            "SELECT 1 FROM items WHERE library_id = ?1 AND object_key = ?2;",
            params![library_id, item_key.as_str()],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !exists {
        return Err(RepoError::not_found(ObjectType::Item, library_id, item_key));
    }

    let version = uow.library_version(library_id)?;
    uow.conn().execute(
        "INSERT INTO item_fulltext (library_id, item_key, indexed_chars, total_chars, version)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (library_id, item_key) DO UPDATE SET
            indexed_chars = excluded.indexed_chars,
            total_chars = excluded.total_chars,
            version = excluded.version,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![
            library_id,
            item_key.as_str(),
            indexed_chars,
            total_chars,
            version
        ],
    )?;
    uow.trigger(
        NotificationEvent::Modify,
        NotifyType::Fulltext,
        [LibraryKey::new(library_id, item_key.clone())],
    );
    Ok(version)
}

pub fn get_fulltext(
    conn: &Connection,
    library_id: LibraryId,
    item_key: &ObjectKey,
) -> RepoResult<Option<FulltextRecord>> {
    let row = conn
        .query_row(
            "SELECT indexed_chars, total_chars, version FROM item_fulltext
             WHERE library_id = ?1 AND item_key = ?2;",
            params![library_id, item_key.as_str()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;
    Ok(row.map(|(indexed_chars, total_chars, version)| FulltextRecord {
        library_id,
        item_key: item_key.clone(),
        indexed_chars,
        total_chars,
        version,
    }))
}

/// Item keys whose full text changed after `since`.
pub fn get_newer_fulltext(
    conn: &Connection,
    library_id: LibraryId,
    since: i64,
) -> RepoResult<BTreeMap<ObjectKey, i64>> {
    let mut stmt = conn.prepare(
        "SELECT item_key, version FROM item_fulltext
         WHERE library_id = ?1 AND version > ?2;",
    )?;
    let mut rows = stmt.query(params![library_id, since])?;
    let mut versions = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let key = parse_key_column(row.get(0)?, "item_fulltext.item_key")?;
        versions.insert(key, row.get::<_, i64>(1)?);
    }
    Ok(versions)
}
