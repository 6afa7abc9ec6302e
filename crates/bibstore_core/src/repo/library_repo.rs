//! Libraries, memberships and access checks.
//!
//! # Invariants
//! - A user library is created together with an `owner` membership for its
//!   user, so access checks only ever consult `library_members`.
//! - Readers may read; every other role may write.

use crate::model::library::{Actor, Library, LibraryId, LibraryRole, LibraryType};
use crate::repo::{RepoError, RepoResult};
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row};

const LIBRARY_SELECT_SQL: &str = "SELECT
    library_id,
    library_type,
    external_id,
    version
FROM libraries";

/// SQLite-backed library repository.
pub struct LibraryRepo<'conn> {
    conn: &'conn Connection,
}

impl<'conn> LibraryRepo<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Creates a library at version 0. User libraries get their owner as a
    /// member.
    pub fn create_library(
        &self,
        library_type: LibraryType,
        external_id: i64,
    ) -> RepoResult<Library> {
        let library_id = self.conn.query_row(
            "INSERT INTO libraries (library_type, external_id)
             VALUES (?1, ?2)
             RETURNING library_id;",
            params![library_type.as_str(), external_id],
            |row| row.get::<_, LibraryId>(0),
        )?;

        if library_type == LibraryType::User {
            self.set_member(library_id, external_id, LibraryRole::Owner)?;
        }

        info!(
            "event=library_create module=repo status=ok library_id={library_id} library_type={} external_id={external_id}",
            library_type.as_str()
        );
        Ok(Library {
            library_id,
            library_type,
            external_id,
            version: 0,
        })
    }

    pub fn get_library(&self, library_id: LibraryId) -> RepoResult<Option<Library>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{LIBRARY_SELECT_SQL} WHERE library_id = ?1;"))?;
        let mut rows = stmt.query([library_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_library_row(row)?));
        }
        Ok(None)
    }

    pub fn require_library(&self, library_id: LibraryId) -> RepoResult<Library> {
        self.get_library(library_id)?
            .ok_or(RepoError::LibraryNotFound(library_id))
    }

    /// Looks a library up by the identity used in object URIs.
    pub fn find_library(
        &self,
        library_type: LibraryType,
        external_id: i64,
    ) -> RepoResult<Option<Library>> {
        let mut stmt = self.conn.prepare(&format!(
            "{LIBRARY_SELECT_SQL} WHERE library_type = ?1 AND external_id = ?2;"
        ))?;
        let mut rows = stmt.query(params![library_type.as_str(), external_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_library_row(row)?));
        }
        Ok(None)
    }

    /// Inserts or replaces one membership.
    pub fn set_member(
        &self,
        library_id: LibraryId,
        user_id: i64,
        role: LibraryRole,
    ) -> RepoResult<()> {
        self.require_library(library_id)?;
        self.conn.execute(
            "INSERT INTO library_members (library_id, user_id, role)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (library_id, user_id) DO UPDATE SET role = excluded.role;",
            params![library_id, user_id, role.as_str()],
        )?;
        Ok(())
    }

    pub fn member_role(&self, library_id: LibraryId, user_id: i64) -> RepoResult<Option<LibraryRole>> {
        let role = self
            .conn
            .query_row(
                "SELECT role FROM library_members WHERE library_id = ?1 AND user_id = ?2;",
                params![library_id, user_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match role {
            Some(value) => LibraryRole::parse(&value).map(Some).ok_or_else(|| {
                RepoError::InvalidData(format!(
                    "invalid role `{value}` in library_members.role"
                ))
            }),
            None => Ok(None),
        }
    }

    /// Fails with `LibraryNotFound` or `LibraryAccessDenied`.
    pub fn require_read(&self, library_id: LibraryId, actor: Actor) -> RepoResult<()> {
        self.require_library(library_id)?;
        match self.member_role(library_id, actor.user_id)? {
            Some(_) => Ok(()),
            None => Err(RepoError::LibraryAccessDenied {
                library_id,
                user_id: actor.user_id,
            }),
        }
    }

    /// Fails with `LibraryNotFound` or `LibraryAccessDenied`.
    pub fn require_write(&self, library_id: LibraryId, actor: Actor) -> RepoResult<()> {
        self.require_library(library_id)?;
        match self.member_role(library_id, actor.user_id)? {
            Some(role) if role.can_write() => Ok(()),
            _ => Err(RepoError::LibraryAccessDenied {
                library_id,
                user_id: actor.user_id,
            }),
        }
    }
}

fn parse_library_row(row: &Row<'_>) -> RepoResult<Library> {
    let type_text: String = row.get("library_type")?;
    let library_type = LibraryType::parse(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid library type `{type_text}` in libraries.library_type"
        ))
    })?;

    Ok(Library {
        library_id: row.get("library_id")?,
        library_type,
        external_id: row.get("external_id")?,
        version: row.get("version")?,
    })
}

#[cfg(test)]
mod tests {
    use super::LibraryRepo;
    use crate::db::open_db_in_memory;
    use crate::model::library::{Actor, LibraryRole, LibraryType};
    use crate::repo::RepoError;

    #[test]
    fn user_library_owner_can_write() {
        let conn = open_db_in_memory().expect("open db");
        let repo = LibraryRepo::new(&conn);
        let library = repo
            .create_library(LibraryType::User, 7)
            .expect("create library");

        repo.require_write(library.library_id, Actor::new(7))
            .expect("owner writes");
        assert!(matches!(
            repo.require_read(library.library_id, Actor::new(8)),
            Err(RepoError::LibraryAccessDenied { user_id: 8, .. })
        ));
    }

    #[test]
    fn group_readers_cannot_write() {
        let conn = open_db_in_memory().expect("open db");
        let repo = LibraryRepo::new(&conn);
        let group = repo
            .create_library(LibraryType::Group, 100)
            .expect("create group");
        repo.set_member(group.library_id, 1, LibraryRole::Admin)
            .expect("add admin");
        repo.set_member(group.library_id, 2, LibraryRole::Reader)
            .expect("add reader");

        repo.require_write(group.library_id, Actor::new(1))
            .expect("admin writes");
        repo.require_read(group.library_id, Actor::new(2))
            .expect("reader reads");
        assert!(matches!(
            repo.require_write(group.library_id, Actor::new(2)),
            Err(RepoError::LibraryAccessDenied { .. })
        ));
    }

    #[test]
    fn find_library_by_uri_identity() {
        let conn = open_db_in_memory().expect("open db");
        let repo = LibraryRepo::new(&conn);
        let group = repo
            .create_library(LibraryType::Group, 55)
            .expect("create group");

        let found = repo
            .find_library(LibraryType::Group, 55)
            .expect("query")
            .expect("group exists");
        assert_eq!(found, group);
        assert!(repo
            .find_library(LibraryType::User, 55)
            .expect("query")
            .is_none());
        assert!(matches!(
            repo.require_library(999),
            Err(RepoError::LibraryNotFound(999))
        ));
    }
}
