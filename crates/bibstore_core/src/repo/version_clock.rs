//! Per-library version counters.
//!
//! # Invariants
//! - The counter lives in `libraries.version`, so a bump rolls back with the
//!   transaction that made it.
//! - Bumps are only legal inside a transaction; `IMMEDIATE` transactions
//!   serialize concurrent writers, so no two callers get the same value.

use crate::model::library::LibraryId;
use crate::repo::{RepoError, RepoResult};
use crate::txn::TransactionError;
use rusqlite::{Connection, OptionalExtension};

/// Increments and returns the library version.
///
/// # Errors
/// - `Transaction(NoTransaction)` when `conn` is in autocommit mode.
/// - `LibraryNotFound` for unknown libraries.
pub fn next_version(conn: &Connection, library_id: LibraryId) -> RepoResult<i64> {
    if conn.is_autocommit() {
        return Err(TransactionError::NoTransaction.into());
    }

    conn.query_row(
        "UPDATE libraries
         SET
            version = version + 1,
            updated_at = (strftime('%s', 'now') * 1000)
         WHERE library_id = ?1
         RETURNING version;",
        [library_id],
        |row| row.get::<_, i64>(0),
    )
    .optional()?
    .ok_or(RepoError::LibraryNotFound(library_id))
}

/// Reads the committed (or in-transaction) library version.
pub fn current_version(conn: &Connection, library_id: LibraryId) -> RepoResult<i64> {
    conn.query_row(
        "SELECT version FROM libraries WHERE library_id = ?1;",
        [library_id],
        |row| row.get::<_, i64>(0),
    )
    .optional()?
    .ok_or(RepoError::LibraryNotFound(library_id))
}
