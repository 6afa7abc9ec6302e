//! Incremental pull: what changed in a library since a known version.

use crate::model::key::ObjectKey;
use crate::model::library::{Actor, LibraryId};
use crate::model::object::ObjectType;
use crate::repo::fulltext_repo::get_newer_fulltext;
use crate::repo::object_repo::{get_deleted_in_library, get_newer_in_library};
use crate::repo::{version_clock, LibraryRepo, RepoError, RepoResult};
use crate::txn::{DataContext, Session};
use log::info;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Changes after a client's `since` version.
///
/// `library_version` is read before the change lists, so a client that
/// resumes from it never misses a later commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryChanges {
    pub library_version: i64,
    pub modified: BTreeMap<ObjectType, BTreeMap<ObjectKey, i64>>,
    pub deleted: BTreeMap<ObjectType, BTreeSet<ObjectKey>>,
    pub fulltext: BTreeMap<ObjectKey, i64>,
}

impl LibraryChanges {
    pub fn is_empty(&self) -> bool {
        self.modified.values().all(BTreeMap::is_empty)
            && self.deleted.values().all(BTreeSet::is_empty)
            && self.fulltext.is_empty()
    }
}

pub struct SyncService;

impl SyncService {
    /// Requires any membership role in the library.
    pub fn changes_since(
        session: &Session<'_>,
        actor: Actor,
        library_id: LibraryId,
        since: i64,
    ) -> RepoResult<LibraryChanges> {
        LibraryRepo::new(session.conn()).require_read(library_id, actor)?;
        let library_version = version_clock::current_version(session.conn(), library_id)?;

        let mut changes = LibraryChanges {
            library_version,
            ..LibraryChanges::default()
        };
        for object_type in ObjectType::ALL {
            let conn = session.conn();
            let deleted = get_deleted_in_library(conn, object_type, library_id, since)?;
            let modified = get_newer_in_library(conn, object_type, library_id, since)?
                .into_iter()
                .filter(|(key, _)| !deleted.contains_key(key))
                .collect::<BTreeMap<_, _>>();

            if !modified.is_empty() {
                changes.modified.insert(object_type, modified);
            }
            if !deleted.is_empty() {
                changes.deleted.insert(object_type, deleted.into_keys().collect());
            }
        }
        changes.fulltext = get_newer_fulltext(session.conn(), library_id, since)?;

        info!(
            "event=sync_pull module=service status=ok library_id={library_id} since={since} library_version={library_version} types_modified={} types_deleted={} fulltext={}",
            changes.modified.len(),
            changes.deleted.len(),
            changes.fulltext.len()
        );
        Ok(changes)
    }

    /// Precondition check for writes that name the library version they were
    /// based on. Returns the current version when it is not newer.
    pub fn check_library_version(
        session: &Session<'_>,
        library_id: LibraryId,
        if_unmodified_since: i64,
    ) -> RepoResult<i64> {
        let current = version_clock::current_version(session.conn(), library_id)?;
        if current > if_unmodified_since {
            return Err(RepoError::VersionConflict {
                target: format!("library {library_id}"),
                expected: if_unmodified_since,
                actual: current,
            });
        }
        Ok(current)
    }
}
