//! Tag store.
//!
//! # Invariants
//! - `(library, name, type)` is unique among live tags.
//! - Renaming or deleting a tag re-versions every item that carries it,
//!   since item JSON embeds tag names.

use crate::model::key::ObjectKey;
use crate::model::library::LibraryId;
use crate::model::object::ObjectType;
use crate::model::tag::Tag;
use crate::model::ValidationError;
use crate::repo::item_repo::items_with_tag;
use crate::repo::object_repo::{parse_key_column, touch, ObjectStore};
use crate::repo::RepoResult;
use crate::txn::{DataContext, UnitOfWork};
use rusqlite::{params, Connection, OptionalExtension};

pub struct TagStore;

impl TagStore {
    /// Live tag with this exact `(name, type)`, if any.
    pub fn find_by_name(
        conn: &Connection,
        library_id: LibraryId,
        name: &str,
        tag_type: i64,
    ) -> RepoResult<Option<Tag>> {
        let row = conn
            .query_row(
                "SELECT object_key FROM tags
                 WHERE library_id = ?1 AND name = ?2 AND tag_type = ?3;",
                params![library_id, name, tag_type],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        match row {
            Some(value) => {
                let key = parse_key_column(value, "tags.object_key")?;
                Self::load(conn, library_id, &key)
            }
            None => Ok(None),
        }
    }
}

impl ObjectStore for TagStore {
    type Object = Tag;

    fn load(conn: &Connection, library_id: LibraryId, key: &ObjectKey) -> RepoResult<Option<Tag>> {
        let row = conn
            .query_row(
                "SELECT name, tag_type, version FROM tags
                 WHERE library_id = ?1 AND object_key = ?2;",
                params![library_id, key.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(name, tag_type, version)| Tag {
            library_id,
            key: key.clone(),
            version,
            name,
            tag_type,
        }))
    }

    fn check_references(conn: &Connection, tag: &Tag) -> RepoResult<()> {
        let duplicate = conn
            .query_row(
                "SELECT object_key FROM tags
                 WHERE library_id = ?1 AND name = ?2 AND tag_type = ?3 AND object_key != ?4;",
                params![tag.library_id, tag.name.as_str(), tag.tag_type, tag.key.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        if let Some(other) = duplicate {
            return Err(ValidationError::InvalidTag(format!(
                "tag `{}` of type {} already exists as {other}",
                tag.name, tag.tag_type
            ))
            .into());
        }
        Ok(())
    }

    fn write(uow: &mut UnitOfWork<'_>, tag: &Tag, previous: Option<&Tag>) -> RepoResult<()> {
        uow.conn().execute(
            "INSERT INTO tags (library_id, object_key, name, tag_type, version)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (library_id, object_key) DO UPDATE SET
                name = excluded.name,
                tag_type = excluded.tag_type,
                version = excluded.version,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                tag.library_id,
                tag.key.as_str(),
                tag.name.as_str(),
                tag.tag_type,
                tag.version,
            ],
        )?;

        let renamed = previous
            .is_some_and(|stored| stored.name != tag.name || stored.tag_type != tag.tag_type);
        if renamed {
            for item_key in items_with_tag(uow.conn(), tag.library_id, &tag.key)? {
                touch(uow, ObjectType::Item, tag.library_id, &item_key)?;
            }
        }
        Ok(())
    }

    fn erase(uow: &mut UnitOfWork<'_>, tag: &Tag) -> RepoResult<()> {
        let linked = items_with_tag(uow.conn(), tag.library_id, &tag.key)?;
        uow.conn().execute(
            "DELETE FROM tags WHERE library_id = ?1 AND object_key = ?2;",
            params![tag.library_id, tag.key.as_str()],
        )?;
        for item_key in linked {
            touch(uow, ObjectType::Item, tag.library_id, &item_key)?;
        }
        Ok(())
    }
}
