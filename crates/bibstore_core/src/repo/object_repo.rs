//! Optimistic-concurrency contract shared by every versioned object type.
//!
//! # Responsibility
//! - Read-through object loads (`<type>_<library>_<key>` cache entries).
//! - Compare-and-swap saves and deletes, stamping the unit of work's library
//!   version and keeping tombstones for incremental sync.
//!
//! # Invariants
//! - An object's version is the library version of the unit of work that
//!   last changed it; a save with identical content changes nothing.
//! - A live row and a tombstone never coexist for one key.
//! - Every change invalidates the object's cache entry and triggers exactly
//!   one notification for the object in its unit of work.

use crate::cache::object_cache_key;
use crate::model::key::ObjectKey;
use crate::model::library::{LibraryId, LibraryKey};
use crate::model::object::{ObjectType, VersionedObject};
use crate::notify::NotificationEvent;
use crate::repo::{version_clock, RepoError, RepoResult};
use crate::txn::{DataContext, UnitOfWork};
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub key: ObjectKey,
    /// New version, or the stored one when nothing changed.
    pub version: i64,
    pub changed: bool,
}

/// Storage hooks for one object type. The provided methods implement the
/// shared versioning protocol on top of them.
pub trait ObjectStore: Sized {
    type Object: VersionedObject;

    /// Loads the live object with all of its links.
    fn load(
        conn: &Connection,
        library_id: LibraryId,
        key: &ObjectKey,
    ) -> RepoResult<Option<Self::Object>>;

    /// Checks references that need storage access (parents, memberships).
    fn check_references(_conn: &Connection, _object: &Self::Object) -> RepoResult<()> {
        Ok(())
    }

    /// Persists the row and its links. `object` already carries the new
    /// version.
    fn write(
        uow: &mut UnitOfWork<'_>,
        object: &Self::Object,
        previous: Option<&Self::Object>,
    ) -> RepoResult<()>;

    /// Removes the row, its links and dependents. Runs after the version
    /// for this unit of work has been assigned.
    fn erase(uow: &mut UnitOfWork<'_>, object: &Self::Object) -> RepoResult<()>;

    fn get<C>(ctx: &mut C, library_id: LibraryId, key: &ObjectKey) -> RepoResult<Option<Self::Object>>
    where
        C: DataContext + ?Sized,
    {
        get_by_library_and_key::<Self, C>(ctx, library_id, key)
    }

    fn save(
        uow: &mut UnitOfWork<'_>,
        object: Self::Object,
        expected_version: Option<i64>,
    ) -> RepoResult<SaveOutcome> {
        save::<Self>(uow, object, expected_version)
    }

    fn delete(
        uow: &mut UnitOfWork<'_>,
        library_id: LibraryId,
        key: &ObjectKey,
        expected_version: Option<i64>,
    ) -> RepoResult<i64> {
        delete::<Self>(uow, library_id, key, expected_version)
    }

    fn get_newer_in_library(
        conn: &Connection,
        library_id: LibraryId,
        since: i64,
    ) -> RepoResult<BTreeMap<ObjectKey, i64>> {
        get_newer_in_library(conn, Self::Object::OBJECT_TYPE, library_id, since)
    }

    fn get_deleted_in_library(
        conn: &Connection,
        library_id: LibraryId,
        since: i64,
    ) -> RepoResult<BTreeMap<ObjectKey, i64>> {
        get_deleted_in_library(conn, Self::Object::OBJECT_TYPE, library_id, since)
    }
}

/// Cache first, relational store second; fills the cache on a miss.
pub fn get_by_library_and_key<S, C>(
    ctx: &mut C,
    library_id: LibraryId,
    key: &ObjectKey,
) -> RepoResult<Option<S::Object>>
where
    S: ObjectStore,
    C: DataContext + ?Sized,
{
    let object_type = S::Object::OBJECT_TYPE;
    let cache_key = object_cache_key(object_type.as_str(), library_id, key.as_str());

    if let Some(cached) = ctx.cache_mut().get(&cache_key) {
        match serde_json::from_str::<S::Object>(&cached) {
            Ok(object) => return Ok(Some(object)),
            Err(err) => {
                warn!(
                    "event=cache_decode module=repo status=error object_type={object_type} cache_key={cache_key} error={err}"
                );
                ctx.cache_mut().delete(&cache_key);
            }
        }
    }

    let loaded = S::load(ctx.conn(), library_id, key)?;
    if let Some(object) = &loaded {
        let encoded = serde_json::to_string(object)?;
        let ttl = ctx.config().cache_ttl();
        ctx.cache_mut().add(&cache_key, encoded, ttl);
    }
    Ok(loaded)
}

/// Validates, compare-and-swaps and persists one object.
///
/// `expected_version`:
/// - `None` overwrites whatever is stored.
/// - `Some(0)` requires that no live object has the key.
/// - `Some(v)` requires the stored version to be exactly `v`.
pub fn save<S: ObjectStore>(
    uow: &mut UnitOfWork<'_>,
    mut object: S::Object,
    expected_version: Option<i64>,
) -> RepoResult<SaveOutcome> {
    let object_type = S::Object::OBJECT_TYPE;
    object.normalize();
    object.validate(uow.config())?;

    let library_id = object.library_id();
    let key = object.key().clone();
    version_clock::current_version(uow.conn(), library_id)?;

    let previous = S::load(uow.conn(), library_id, &key)?;
    match (&previous, expected_version) {
        (Some(stored), Some(expected)) if stored.version() != expected => {
            return Err(version_conflict(object_type, library_id, &key, expected, stored.version()));
        }
        (None, Some(expected)) if expected > 0 => {
            return Err(RepoError::not_found(object_type, library_id, &key));
        }
        _ => {}
    }

    S::check_references(uow.conn(), &object)?;

    if let Some(stored) = &previous {
        if stored.same_content(&object) {
            info!(
                "event=object_save module=repo status=unchanged object_type={object_type} library_id={library_id} key={key} version={}",
                stored.version()
            );
            return Ok(SaveOutcome {
                key,
                version: stored.version(),
                changed: false,
            });
        }
    }

    let version = uow.library_version(library_id)?;
    object.set_version(version);
    S::write(uow, &object, previous.as_ref())?;
    clear_tombstone(uow.conn(), object_type, library_id, &key)?;
    invalidate(uow, object_type, library_id, &key);

    let event = if previous.is_some() {
        NotificationEvent::Modify
    } else {
        NotificationEvent::Add
    };
    uow.trigger(event, object_type.into(), [LibraryKey::new(library_id, key.clone())]);

    info!(
        "event=object_save module=repo status=ok object_type={object_type} library_id={library_id} key={key} version={version} action={event}"
    );
    Ok(SaveOutcome {
        key,
        version,
        changed: true,
    })
}

/// Compare-and-swap delete. Returns the tombstone version.
///
/// Deleting an already tombstoned key returns the existing tombstone
/// version; a key that never existed is `NotFound`.
pub fn delete<S: ObjectStore>(
    uow: &mut UnitOfWork<'_>,
    library_id: LibraryId,
    key: &ObjectKey,
    expected_version: Option<i64>,
) -> RepoResult<i64> {
    let object_type = S::Object::OBJECT_TYPE;
    version_clock::current_version(uow.conn(), library_id)?;

    let Some(current) = S::load(uow.conn(), library_id, key)? else {
        return match tombstone_version(uow.conn(), object_type, library_id, key)? {
            Some(version) => Ok(version),
            None => Err(RepoError::not_found(object_type, library_id, key)),
        };
    };

    if let Some(expected) = expected_version {
        if current.version() != expected {
            return Err(version_conflict(object_type, library_id, key, expected, current.version()));
        }
    }

    let version = remove_loaded::<S>(uow, &current)?;
    info!(
        "event=object_delete module=repo status=ok object_type={object_type} library_id={library_id} key={key} version={version}"
    );
    Ok(version)
}

/// Erases a loaded object without a version check and records its
/// tombstone. Used by `delete` and by cascades.
pub(crate) fn remove_loaded<S: ObjectStore>(
    uow: &mut UnitOfWork<'_>,
    object: &S::Object,
) -> RepoResult<i64> {
    let object_type = S::Object::OBJECT_TYPE;
    let library_id = object.library_id();
    let key = object.key().clone();

    let version = uow.library_version(library_id)?;
    S::erase(uow, object)?;
    write_tombstone(uow.conn(), object_type, library_id, &key, version)?;
    invalidate(uow, object_type, library_id, &key);
    uow.trigger(
        NotificationEvent::Delete,
        object_type.into(),
        [LibraryKey::new(library_id, key)],
    );
    Ok(version)
}

/// Re-stamps an existing object with this unit of work's version because a
/// linked object changed what its JSON shows. Returns `false` when the
/// object does not exist.
pub(crate) fn touch(
    uow: &mut UnitOfWork<'_>,
    object_type: ObjectType,
    library_id: LibraryId,
    key: &ObjectKey,
) -> RepoResult<bool> {
    let exists = uow
        .conn()
        .query_row(
            &format!(
                "SELECT 1 FROM {} WHERE library_id = ?1 AND object_key = ?2;",
                object_type.table()
            ),
            params![library_id, key.as_str()],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !exists {
        return Ok(false);
    }

    let version = uow.library_version(library_id)?;
    uow.conn().execute(
        &format!(
            "UPDATE {}
             SET
                version = ?1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE library_id = ?2 AND object_key = ?3;",
            object_type.table()
        ),
        params![version, library_id, key.as_str()],
    )?;
    invalidate(uow, object_type, library_id, key);
    uow.trigger(
        NotificationEvent::Modify,
        object_type.into(),
        [LibraryKey::new(library_id, key.clone())],
    );
    Ok(true)
}

/// Keys of live and tombstoned objects changed after `since`.
pub fn get_newer_in_library(
    conn: &Connection,
    object_type: ObjectType,
    library_id: LibraryId,
    since: i64,
) -> RepoResult<BTreeMap<ObjectKey, i64>> {
    let sql = format!(
        "SELECT object_key, version FROM {}
         WHERE library_id = ?1 AND version > ?2
         UNION ALL
         SELECT object_key, version FROM deleted_objects
         WHERE library_id = ?1 AND object_type = ?3 AND version > ?2;",
        object_type.table()
    );
    collect_key_versions(conn, &sql, library_id, since, object_type)
}

/// Keys tombstoned after `since`.
pub fn get_deleted_in_library(
    conn: &Connection,
    object_type: ObjectType,
    library_id: LibraryId,
    since: i64,
) -> RepoResult<BTreeMap<ObjectKey, i64>> {
    let sql = "SELECT object_key, version FROM deleted_objects
         WHERE library_id = ?1 AND version > ?2 AND object_type = ?3;";
    collect_key_versions(conn, sql, library_id, since, object_type)
}

pub fn tombstone_version(
    conn: &Connection,
    object_type: ObjectType,
    library_id: LibraryId,
    key: &ObjectKey,
) -> RepoResult<Option<i64>> {
    let version = conn
        .query_row(
            "SELECT version FROM deleted_objects
             WHERE library_id = ?1 AND object_type = ?2 AND object_key = ?3;",
            params![library_id, object_type.as_str(), key.as_str()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(version)
}

/// Parses a stored key column.
pub(crate) fn parse_key_column(value: String, column: &str) -> RepoResult<ObjectKey> {
    ObjectKey::try_from(value)
        .map_err(|err| RepoError::InvalidData(format!("{err} in {column}")))
}

pub(crate) fn invalidate(
    uow: &mut UnitOfWork<'_>,
    object_type: ObjectType,
    library_id: LibraryId,
    key: &ObjectKey,
) {
    uow.cache_mut()
        .delete(&object_cache_key(object_type.as_str(), library_id, key.as_str()));
}

fn version_conflict(
    object_type: ObjectType,
    library_id: LibraryId,
    key: &ObjectKey,
    expected: i64,
    actual: i64,
) -> RepoError {
    RepoError::VersionConflict {
        target: format!("{object_type} {}", LibraryKey::new(library_id, key.clone())),
        expected,
        actual,
    }
}

fn write_tombstone(
    conn: &Connection,
    object_type: ObjectType,
    library_id: LibraryId,
    key: &ObjectKey,
    version: i64,
) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO deleted_objects (library_id, object_type, object_key, version)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (library_id, object_type, object_key)
         DO UPDATE SET version = excluded.version;",
        params![library_id, object_type.as_str(), key.as_str(), version],
    )?;
    Ok(())
}

fn clear_tombstone(
    conn: &Connection,
    object_type: ObjectType,
    library_id: LibraryId,
    key: &ObjectKey,
) -> RepoResult<()> {
    conn.execute(
        "DELETE FROM deleted_objects
         WHERE library_id = ?1 AND object_type = ?2 AND object_key = ?3;",
        params![library_id, object_type.as_str(), key.as_str()],
    )?;
    Ok(())
}

fn collect_key_versions(
    conn: &Connection,
    sql: &str,
    library_id: LibraryId,
    since: i64,
    object_type: ObjectType,
) -> RepoResult<BTreeMap<ObjectKey, i64>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params![library_id, since, object_type.as_str()])?;
    let mut versions = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let key = parse_key_column(row.get(0)?, "object_key")?;
        versions.insert(key, row.get::<_, i64>(1)?);
    }
    Ok(versions)
}
