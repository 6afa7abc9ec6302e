//! Item store.
//!
//! # Responsibility
//! - Map items to `items` rows plus `collection_items`, `item_tags` and
//!   `relations` links.
//! - Resolve tag names to tag objects, creating missing tags in the same
//!   unit of work.
//! - Mirror `dc:relation` onto related items.
//!
//! # Invariants
//! - Child items (notes, attachments) hang off live regular items only.
//! - Deleting an item deletes its children and detaches every relation
//!   pointing at it.

use crate::model::item::{is_regular_type, Item, ItemTag};
use crate::model::key::ObjectKey;
use crate::model::library::LibraryId;
use crate::model::object::ObjectType;
use crate::model::tag::Tag;
use crate::model::ValidationError;
use crate::repo::object_repo::{parse_key_column, remove_loaded, save, ObjectStore};
use crate::repo::relation_repo::{
    apply_mirror, delete_relations, detach_references, item_uri, load_relations,
    plan_item_mirror, replace_relations,
};
use crate::repo::{LibraryRepo, RepoError, RepoResult, TagStore};
use crate::txn::{DataContext, UnitOfWork};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, BTreeSet};

const ITEM_SELECT_SQL: &str = "SELECT
    item_type,
    parent_key,
    fields,
    note,
    in_trash,
    version
FROM items";

pub struct ItemStore;

impl ObjectStore for ItemStore {
    type Object = Item;

    fn load(conn: &Connection, library_id: LibraryId, key: &ObjectKey) -> RepoResult<Option<Item>> {
        let mut stmt = conn.prepare(&format!(
            "{ITEM_SELECT_SQL} WHERE library_id = ?1 AND object_key = ?2;"
        ))?;
        let mut rows = stmt.query(params![library_id, key.as_str()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let mut item = parse_item_row(row, library_id, key)?;
        item.collections = load_collection_keys(conn, library_id, key)?;
        item.tags = load_item_tags(conn, library_id, key)?;
        item.relations = load_relations(conn, library_id, ObjectType::Item, key)?;
        Ok(Some(item))
    }

    fn check_references(conn: &Connection, item: &Item) -> RepoResult<()> {
        if let Some(parent_key) = &item.parent_item {
            let parent_type = conn
                .query_row(
                    "SELECT item_type FROM items WHERE library_id = ?1 AND object_key = ?2;",
                    params![item.library_id, parent_key.as_str()],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
                .ok_or_else(|| {
                    ValidationError::InvalidReference(format!(
                        "parent item {parent_key} does not exist"
                    ))
                })?;
            if !is_regular_type(&parent_type) {
                return Err(ValidationError::InvalidReference(format!(
                    "parent item {parent_key} is not a regular item"
                ))
                .into());
            }
        }

        if !item.is_regular() {
            let children: i64 = conn.query_row(
                "SELECT COUNT(*) FROM items WHERE library_id = ?1 AND parent_key = ?2;",
                params![item.library_id, item.key.as_str()],
                |row| row.get(0),
            )?;
            if children > 0 {
                return Err(ValidationError::InvalidReference(format!(
                    "item {} has child items and must stay a regular item",
                    item.key
                ))
                .into());
            }
        }

        for collection_key in &item.collections {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM collections WHERE library_id = ?1 AND object_key = ?2;",
                    params![item.library_id, collection_key.as_str()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !exists {
                return Err(ValidationError::InvalidReference(format!(
                    "collection {collection_key} does not exist"
                ))
                .into());
            }
        }
        Ok(())
    }

    fn write(uow: &mut UnitOfWork<'_>, item: &Item, previous: Option<&Item>) -> RepoResult<()> {
        let plan = plan_item_mirror(uow.conn(), uow.config(), item, previous)?;
        let tag_keys = resolve_tag_keys(uow, item.library_id, &item.tags)?;

        let fields = serde_json::to_string(&item.fields)?;
        let conn = uow.conn();
        conn.execute(
            "INSERT INTO items (
                library_id,
                object_key,
                item_type,
                parent_key,
                fields,
                note,
                in_trash,
                version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (library_id, object_key) DO UPDATE SET
                item_type = excluded.item_type,
                parent_key = excluded.parent_key,
                fields = excluded.fields,
                note = excluded.note,
                in_trash = excluded.in_trash,
                version = excluded.version,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                item.library_id,
                item.key.as_str(),
                item.item_type.as_str(),
                item.parent_item.as_ref().map(ObjectKey::as_str),
                fields,
                item.note.as_deref(),
                bool_to_int(item.deleted),
                item.version,
            ],
        )?;

        conn.execute(
            "DELETE FROM collection_items WHERE library_id = ?1 AND item_key = ?2;",
            params![item.library_id, item.key.as_str()],
        )?;
        for collection_key in &item.collections {
            conn.execute(
                "INSERT INTO collection_items (library_id, collection_key, item_key)
                 VALUES (?1, ?2, ?3);",
                params![item.library_id, collection_key.as_str(), item.key.as_str()],
            )?;
        }

        conn.execute(
            "DELETE FROM item_tags WHERE library_id = ?1 AND item_key = ?2;",
            params![item.library_id, item.key.as_str()],
        )?;
        for tag_key in &tag_keys {
            conn.execute(
                "INSERT OR IGNORE INTO item_tags (library_id, item_key, tag_key)
                 VALUES (?1, ?2, ?3);",
                params![item.library_id, item.key.as_str(), tag_key.as_str()],
            )?;
        }

        replace_relations(
            conn,
            item.library_id,
            ObjectType::Item,
            &item.key,
            &item.relations,
        )?;

        if !plan.is_empty() {
            apply_mirror(uow, item.library_id, plan)?;
        }
        Ok(())
    }

    fn erase(uow: &mut UnitOfWork<'_>, item: &Item) -> RepoResult<()> {
        let library_id = item.library_id;
        for child_key in child_keys(uow.conn(), library_id, &item.key)? {
            if let Some(child) = Self::load(uow.conn(), library_id, &child_key)? {
                remove_loaded::<Self>(uow, &child)?;
            }
        }

        let library = LibraryRepo::new(uow.conn()).require_library(library_id)?;
        let uri = item_uri(&library, &item.key, uow.config());
        detach_references(uow, library_id, &uri)?;
        delete_relations(uow.conn(), library_id, ObjectType::Item, &item.key)?;

        uow.conn().execute(
            "DELETE FROM items WHERE library_id = ?1 AND object_key = ?2;",
            params![library_id, item.key.as_str()],
        )?;
        Ok(())
    }
}

/// Keys of items currently linked to `tag_key`.
pub(crate) fn items_with_tag(
    conn: &Connection,
    library_id: LibraryId,
    tag_key: &ObjectKey,
) -> RepoResult<Vec<ObjectKey>> {
    collect_keys(
        conn,
        "SELECT item_key FROM item_tags WHERE library_id = ?1 AND tag_key = ?2;",
        library_id,
        tag_key,
        "item_tags.item_key",
    )
}

/// Keys of items currently in `collection_key`.
pub(crate) fn items_in_collection(
    conn: &Connection,
    library_id: LibraryId,
    collection_key: &ObjectKey,
) -> RepoResult<Vec<ObjectKey>> {
    collect_keys(
        conn,
        "SELECT item_key FROM collection_items WHERE library_id = ?1 AND collection_key = ?2;",
        library_id,
        collection_key,
        "collection_items.item_key",
    )
}

fn child_keys(
    conn: &Connection,
    library_id: LibraryId,
    parent_key: &ObjectKey,
) -> RepoResult<Vec<ObjectKey>> {
    collect_keys(
        conn,
        "SELECT object_key FROM items WHERE library_id = ?1 AND parent_key = ?2;",
        library_id,
        parent_key,
        "items.object_key",
    )
}

fn load_collection_keys(
    conn: &Connection,
    library_id: LibraryId,
    key: &ObjectKey,
) -> RepoResult<BTreeSet<ObjectKey>> {
    Ok(collect_keys(
        conn,
        "SELECT collection_key FROM collection_items WHERE library_id = ?1 AND item_key = ?2;",
        library_id,
        key,
        "collection_items.collection_key",
    )?
    .into_iter()
    .collect())
}

fn load_item_tags(
    conn: &Connection,
    library_id: LibraryId,
    key: &ObjectKey,
) -> RepoResult<BTreeSet<ItemTag>> {
    let mut stmt = conn.prepare(
        "SELECT tags.name, tags.tag_type
         FROM item_tags
         JOIN tags
           ON tags.library_id = item_tags.library_id
          AND tags.object_key = item_tags.tag_key
         WHERE item_tags.library_id = ?1 AND item_tags.item_key = ?2;",
    )?;
    let mut rows = stmt.query(params![library_id, key.as_str()])?;
    let mut tags = BTreeSet::new();
    while let Some(row) = rows.next()? {
        tags.insert(ItemTag {
            tag: row.get(0)?,
            tag_type: row.get(1)?,
        });
    }
    Ok(tags)
}

/// Finds or creates the tag object behind each `(name, type)` pair.
fn resolve_tag_keys(
    uow: &mut UnitOfWork<'_>,
    library_id: LibraryId,
    tags: &BTreeSet<ItemTag>,
) -> RepoResult<Vec<ObjectKey>> {
    let mut keys = Vec::with_capacity(tags.len());
    for tag in tags {
        let existing = TagStore::find_by_name(uow.conn(), library_id, &tag.tag, tag.tag_type)?;
        let key = match existing {
            Some(stored) => stored.key,
            None => {
                let created = Tag::new(library_id, tag.tag.clone(), tag.tag_type);
                save::<TagStore>(uow, created, Some(0))?.key
            }
        };
        keys.push(key);
    }
    Ok(keys)
}

fn collect_keys(
    conn: &Connection,
    sql: &str,
    library_id: LibraryId,
    key: &ObjectKey,
    column: &str,
) -> RepoResult<Vec<ObjectKey>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params![library_id, key.as_str()])?;
    let mut keys = Vec::new();
    while let Some(row) = rows.next()? {
        keys.push(parse_key_column(row.get(0)?, column)?);
    }
    Ok(keys)
}

fn parse_item_row(row: &Row<'_>, library_id: LibraryId, key: &ObjectKey) -> RepoResult<Item> {
    let fields_text: String = row.get("fields")?;
    let fields = serde_json::from_str::<BTreeMap<String, String>>(&fields_text).map_err(|err| {
        RepoError::InvalidData(format!("invalid fields json for item {key}: {err}"))
    })?;

    let parent_item = match row.get::<_, Option<String>>("parent_key")? {
        Some(value) => Some(parse_key_column(value, "items.parent_key")?),
        None => None,
    };

    let deleted = match row.get::<_, i64>("in_trash")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid in_trash value `{other}` in items.in_trash"
            )));
        }
    };

    let mut item = Item::with_key(library_id, key.clone(), row.get::<_, String>("item_type")?);
    item.version = row.get("version")?;
    item.parent_item = parent_item;
    item.fields = fields;
    item.note = row.get("note")?;
    item.deleted = deleted;
    Ok(item)
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
