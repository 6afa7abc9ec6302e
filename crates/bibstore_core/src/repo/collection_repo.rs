//! Collection store.
//!
//! # Invariants
//! - Parent links form a forest: no collection is its own ancestor.
//! - Deleting a collection deletes its sub-collections and re-versions the
//!   items that listed it.

use crate::model::collection::Collection;
use crate::model::key::ObjectKey;
use crate::model::library::LibraryId;
use crate::model::object::ObjectType;
use crate::model::ValidationError;
use crate::repo::item_repo::items_in_collection;
use crate::repo::object_repo::{parse_key_column, remove_loaded, touch, ObjectStore};
use crate::repo::relation_repo::{delete_relations, load_relations, replace_relations};
use crate::repo::RepoResult;
use crate::txn::{DataContext, UnitOfWork};
use rusqlite::{params, Connection, OptionalExtension};

/// Upper bound on parent chain walks; deeper chains are treated as cycles.
const MAX_COLLECTION_DEPTH: usize = 256;

pub struct CollectionStore;

impl ObjectStore for CollectionStore {
    type Object = Collection;

    fn load(
        conn: &Connection,
        library_id: LibraryId,
        key: &ObjectKey,
    ) -> RepoResult<Option<Collection>> {
        let row = conn
            .query_row(
                "SELECT name, parent_key, version FROM collections
                 WHERE library_id = ?1 AND object_key = ?2;",
                params![library_id, key.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((name, parent_key, version)) = row else {
            return Ok(None);
        };

        let parent_collection = match parent_key {
            Some(value) => Some(parse_key_column(value, "collections.parent_key")?),
            None => None,
        };
        Ok(Some(Collection {
            library_id,
            key: key.clone(),
            version,
            name,
            parent_collection,
            relations: load_relations(conn, library_id, ObjectType::Collection, key)?,
        }))
    }

    fn check_references(conn: &Connection, collection: &Collection) -> RepoResult<()> {
        let mut cursor = collection.parent_collection.clone();
        let mut depth = 0;
        while let Some(current) = cursor {
            if current == collection.key || depth >= MAX_COLLECTION_DEPTH {
                return Err(ValidationError::InvalidReference(format!(
                    "collection {} cannot be nested under its own descendant",
                    collection.key
                ))
                .into());
            }

            let parent = conn
                .query_row(
                    "SELECT parent_key FROM collections WHERE library_id = ?1 AND object_key = ?2;",
                    params![collection.library_id, current.as_str()],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?;
            cursor = match parent {
                None => {
                    return Err(ValidationError::InvalidReference(format!(
                        "parent collection {current} does not exist"
                    ))
                    .into());
                }
                Some(Some(value)) => Some(parse_key_column(value, "collections.parent_key")?),
                Some(None) => None,
            };
            depth += 1;
        }
        Ok(())
    }

    fn write(
        uow: &mut UnitOfWork<'_>,
        collection: &Collection,
        _previous: Option<&Collection>,
    ) -> RepoResult<()> {
        let conn = uow.conn();
        conn.execute(
            "INSERT INTO collections (library_id, object_key, name, parent_key, version)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (library_id, object_key) DO UPDATE SET
                name = excluded.name,
                parent_key = excluded.parent_key,
                version = excluded.version,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                collection.library_id,
                collection.key.as_str(),
                collection.name.as_str(),
                collection.parent_collection.as_ref().map(ObjectKey::as_str),
                collection.version,
            ],
        )?;
        replace_relations(
            conn,
            collection.library_id,
            ObjectType::Collection,
            &collection.key,
            &collection.relations,
        )
    }

    fn erase(uow: &mut UnitOfWork<'_>, collection: &Collection) -> RepoResult<()> {
        let library_id = collection.library_id;
        for child_key in sub_collection_keys(uow.conn(), library_id, &collection.key)? {
            if let Some(child) = Self::load(uow.conn(), library_id, &child_key)? {
                remove_loaded::<Self>(uow, &child)?;
            }
        }

        let members = items_in_collection(uow.conn(), library_id, &collection.key)?;
        delete_relations(uow.conn(), library_id, ObjectType::Collection, &collection.key)?;
        uow.conn().execute(
            "DELETE FROM collections WHERE library_id = ?1 AND object_key = ?2;",
            params![library_id, collection.key.as_str()],
        )?;
        for item_key in members {
            touch(uow, ObjectType::Item, library_id, &item_key)?;
        }
        Ok(())
    }
}

fn sub_collection_keys(
    conn: &Connection,
    library_id: LibraryId,
    parent_key: &ObjectKey,
) -> RepoResult<Vec<ObjectKey>> {
    let mut stmt = conn.prepare(
        "SELECT object_key FROM collections WHERE library_id = ?1 AND parent_key = ?2;",
    )?;
    let mut rows = stmt.query(params![library_id, parent_key.as_str()])?;
    let mut keys = Vec::new();
    while let Some(row) = rows.next()? {
        keys.push(parse_key_column(row.get(0)?, "collections.object_key")?);
    }
    Ok(keys)
}
