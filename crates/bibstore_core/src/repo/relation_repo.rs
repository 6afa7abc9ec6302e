//! Relation rows and bidirectional mirroring.
//!
//! # Responsibility
//! - Persist relation sets of items and collections.
//! - Mirror bidirectional predicates between items as an explicit two-phase
//!   write: resolve and validate every target first, then apply both sides.
//!
//! # Invariants
//! - Reverse relations are stored as rows owned by the target item, so the
//!   target's JSON shows them and re-saving that JSON is a no-op.
//! - Adding or removing a reverse row re-versions the target item in the
//!   same unit of work.

use crate::config::CoreConfig;
use crate::model::item::Item;
use crate::model::key::ObjectKey;
use crate::model::library::{Library, LibraryId};
use crate::model::object::ObjectType;
use crate::model::relation::{bidirectional_predicates, ItemUri, RelationSet};
use crate::model::ValidationError;
use crate::repo::object_repo::{parse_key_column, touch};
use crate::repo::{LibraryRepo, RepoError, RepoResult};
use crate::txn::{DataContext, UnitOfWork};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

pub fn load_relations(
    conn: &Connection,
    library_id: LibraryId,
    owner_type: ObjectType,
    key: &ObjectKey,
) -> RepoResult<RelationSet> {
    let mut stmt = conn.prepare(
        "SELECT predicate, object FROM relations
         WHERE library_id = ?1 AND object_type = ?2 AND object_key = ?3;",
    )?;
    let mut rows = stmt.query(params![library_id, owner_type.as_str(), key.as_str()])?;
    let mut relations = RelationSet::new();
    while let Some(row) = rows.next()? {
        relations.insert(row.get::<_, String>(0)?, row.get::<_, String>(1)?);
    }
    Ok(relations)
}

/// Replaces every relation row owned by one object.
pub fn replace_relations(
    conn: &Connection,
    library_id: LibraryId,
    owner_type: ObjectType,
    key: &ObjectKey,
    relations: &RelationSet,
) -> RepoResult<()> {
    delete_relations(conn, library_id, owner_type, key)?;
    let mut stmt = conn.prepare(
        "INSERT INTO relations (library_id, object_type, object_key, predicate, object)
         VALUES (?1, ?2, ?3, ?4, ?5);",
    )?;
    for (predicate, object) in relations.iter() {
        stmt.execute(params![
            library_id,
            owner_type.as_str(),
            key.as_str(),
            predicate,
            object
        ])?;
    }
    Ok(())
}

pub fn delete_relations(
    conn: &Connection,
    library_id: LibraryId,
    owner_type: ObjectType,
    key: &ObjectKey,
) -> RepoResult<()> {
    conn.execute(
        "DELETE FROM relations
         WHERE library_id = ?1 AND object_type = ?2 AND object_key = ?3;",
        params![library_id, owner_type.as_str(), key.as_str()],
    )?;
    Ok(())
}

/// URI other objects use to point at an item.
pub fn item_uri(library: &Library, key: &ObjectKey, config: &CoreConfig) -> String {
    ItemUri::new(library.library_type, library.external_id, key.clone()).to_uri(&config.uri_base)
}

/// Removes every relation row in `library_id` whose value is `uri` and
/// re-versions the owners. Used when the pointed-at item disappears.
pub(crate) fn detach_references(
    uow: &mut UnitOfWork<'_>,
    library_id: LibraryId,
    uri: &str,
) -> RepoResult<()> {
    let owners = {
        let mut stmt = uow.conn().prepare(
            "SELECT DISTINCT object_type, object_key FROM relations
             WHERE library_id = ?1 AND object = ?2;",
        )?;
        let mut rows = stmt.query(params![library_id, uri])?;
        let mut owners = Vec::new();
        while let Some(row) = rows.next()? {
            let type_text: String = row.get(0)?;
            let owner_type = ObjectType::parse(&type_text).ok_or_else(|| {
                RepoError::InvalidData(format!(
                    "invalid object type `{type_text}` in relations.object_type"
                ))
            })?;
            owners.push((owner_type, parse_key_column(row.get(1)?, "relations.object_key")?));
        }
        owners
    };

    uow.conn().execute(
        "DELETE FROM relations WHERE library_id = ?1 AND object = ?2;",
        params![library_id, uri],
    )?;
    for (owner_type, owner_key) in owners {
        touch(uow, owner_type, library_id, &owner_key)?;
    }
    Ok(())
}

/// Reverse-row changes resolved before any of them is applied.
#[derive(Debug, Default)]
pub(crate) struct MirrorPlan {
    own_uri: String,
    add: Vec<(String, ObjectKey)>,
    remove: Vec<(String, ObjectKey)>,
}

impl MirrorPlan {
    pub(crate) fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Phase one: diffs bidirectional predicates and validates every new target.
pub(crate) fn plan_item_mirror(
    conn: &Connection,
    config: &CoreConfig,
    item: &Item,
    previous: Option<&Item>,
) -> RepoResult<MirrorPlan> {
    let library = LibraryRepo::new(conn).require_library(item.library_id)?;
    let empty = RelationSet::new();
    let before = previous.map_or(&empty, |stored| &stored.relations);

    let mut plan = MirrorPlan {
        own_uri: item_uri(&library, &item.key, config),
        ..MirrorPlan::default()
    };

    for predicate in bidirectional_predicates() {
        for uri in item.relations.missing_from(before, predicate) {
            let target = resolve_target(conn, config, &library, item, predicate, uri)?;
            plan.add.push(((*predicate).to_string(), target));
        }
        for uri in before.missing_from(&item.relations, predicate) {
            // Stale values from before a target was deleted simply vanish.
            if let Some(target) = ItemUri::parse(&config.uri_base, uri)
                .filter(|target| same_library(&library, target) && target.key != item.key)
            {
                plan.remove.push(((*predicate).to_string(), target.key));
            }
        }
    }
    Ok(plan)
}

/// Phase two: writes or deletes reverse rows and touches their owners.
pub(crate) fn apply_mirror(
    uow: &mut UnitOfWork<'_>,
    library_id: LibraryId,
    plan: MirrorPlan,
) -> RepoResult<()> {
    for (predicate, target) in &plan.add {
        let inserted = uow.conn().execute(
            "INSERT OR IGNORE INTO relations (library_id, object_type, object_key, predicate, object)
             VALUES (?1, 'item', ?2, ?3, ?4);",
            params![library_id, target.as_str(), predicate, plan.own_uri],
        )?;
        if inserted > 0 {
            touch(uow, ObjectType::Item, library_id, target)?;
        }
    }
    for (predicate, target) in &plan.remove {
        let removed = uow.conn().execute(
            "DELETE FROM relations
             WHERE library_id = ?1
               AND object_type = 'item'
               AND object_key = ?2
               AND predicate = ?3
               AND object = ?4;",
            params![library_id, target.as_str(), predicate, plan.own_uri],
        )?;
        if removed > 0 {
            touch(uow, ObjectType::Item, library_id, target)?;
        }
    }
    debug!(
        "event=relation_mirror module=repo status=ok library_id={library_id} added={} removed={}",
        plan.add.len(),
        plan.remove.len()
    );
    Ok(())
}

fn resolve_target(
    conn: &Connection,
    config: &CoreConfig,
    library: &Library,
    item: &Item,
    predicate: &str,
    uri: &str,
) -> RepoResult<ObjectKey> {
    let target = ItemUri::parse(&config.uri_base, uri).ok_or_else(|| {
        ValidationError::InvalidRelationUri {
            predicate: predicate.to_string(),
            uri: uri.to_string(),
        }
    })?;
    if !same_library(library, &target) {
        return Err(ValidationError::InvalidReference(format!(
            "`{predicate}` target {uri} is outside library {}",
            library.library_id
        ))
        .into());
    }
    if target.key == item.key {
        return Err(ValidationError::SelfRelation(item.key.to_string()).into());
    }

    let exists = conn
        .query_row(
            "SELECT 1 FROM items WHERE library_id = ?1 AND object_key = ?2;",
            params![library.library_id, target.key.as_str()],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !exists {
        return Err(ValidationError::InvalidReference(format!(
            "`{predicate}` target item {} does not exist",
            target.key
        ))
        .into());
    }
    Ok(target.key)
}

fn same_library(library: &Library, target: &ItemUri) -> bool {
    target.library_type == library.library_type && target.external_id == library.external_id
}
