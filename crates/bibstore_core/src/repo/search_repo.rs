//! Saved search store.

use crate::model::key::ObjectKey;
use crate::model::library::LibraryId;
use crate::model::saved_search::{SavedSearch, SearchCondition};
use crate::repo::object_repo::ObjectStore;
use crate::repo::{RepoError, RepoResult};
use crate::txn::{DataContext, UnitOfWork};
use rusqlite::{params, Connection, OptionalExtension};

pub struct SearchStore;

impl ObjectStore for SearchStore {
    type Object = SavedSearch;

    fn load(
        conn: &Connection,
        library_id: LibraryId,
        key: &ObjectKey,
    ) -> RepoResult<Option<SavedSearch>> {
        let row = conn
            .query_row(
                "SELECT name, conditions, version FROM saved_searches
                 WHERE library_id = ?1 AND object_key = ?2;",
                params![library_id, key.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((name, conditions_text, version)) = row else {
            return Ok(None);
        };

        let conditions = serde_json::from_str::<Vec<SearchCondition>>(&conditions_text)
            .map_err(|err| {
                RepoError::InvalidData(format!(
                    "invalid conditions json for saved search {key}: {err}"
                ))
            })?;
        Ok(Some(SavedSearch {
            library_id,
            key: key.clone(),
            version,
            name,
            conditions,
        }))
    }

    fn write(
        uow: &mut UnitOfWork<'_>,
        search: &SavedSearch,
        _previous: Option<&SavedSearch>,
    ) -> RepoResult<()> {
        let conditions = serde_json::to_string(&search.conditions)?;
        uow.conn().execute(
            "INSERT INTO saved_searches (library_id, object_key, name, conditions, version)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (library_id, object_key) DO UPDATE SET
                name = excluded.name,
                conditions = excluded.conditions,
                version = excluded.version,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                search.library_id,
                search.key.as_str(),
                search.name.as_str(),
                conditions,
                search.version,
            ],
        )?;
        Ok(())
    }

    fn erase(uow: &mut UnitOfWork<'_>, search: &SavedSearch) -> RepoResult<()> {
        uow.conn().execute(
            "DELETE FROM saved_searches WHERE library_id = ?1 AND object_key = ?2;",
            params![search.library_id, search.key.as_str()],
        )?;
        Ok(())
    }
}
