//! Schema migrations for the bibliographic store.
//!
//! # Invariants
//! - Versions are strictly increasing; the applied version is mirrored to
//!   `PRAGMA user_version`.
//! - Each migration commits on its own, so a failure keeps earlier steps.
//! - The pending set is re-read under a write lock, so processes opening the
//!   same file at once apply every step exactly once.

use crate::db::{DbError, DbResult};
use log::{error, info};
use rusqlite::{Connection, TransactionBehavior};

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "init",
        sql: include_str!("0001_init.sql"),
    },
    Migration {
        version: 2,
        name: "fulltext",
        sql: include_str!("0002_fulltext.sql"),
    },
];

pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Brings the schema of `conn` up to [`latest_version`].
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the file was written by a newer build.
/// - `Migration` naming the first step that failed.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let latest = latest_version();
    let from_version = user_version(conn)?;
    check_supported(from_version, latest)?;
    if from_version == latest {
        return Ok(());
    }

    for migration in MIGRATIONS {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = user_version(&tx)?;
        check_supported(current, latest)?;
        if migration.version <= current {
            continue;
        }

        let applied = tx
            .execute_batch(migration.sql)
            .and_then(|()| {
                tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))
            })
            .and_then(|()| tx.commit());
        if let Err(source) = applied {
            error!(
                "event=db_migrate module=db status=error version={} name={} error={source}",
                migration.version, migration.name
            );
            return Err(DbError::Migration {
                version: migration.version,
                name: migration.name,
                source,
            });
        }
        info!(
            "event=db_migrate module=db status=ok version={} name={}",
            migration.version, migration.name
        );
    }

    info!("event=db_migrate module=db status=done from_version={from_version} to_version={latest}");
    Ok(())
}

fn check_supported(db_version: u32, latest_supported: u32) -> DbResult<()> {
    if db_version > latest_supported {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        });
    }
    Ok(())
}

fn user_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?)
}

#[cfg(test)]
mod tests {
    use super::{apply_migrations, latest_version, user_version, MIGRATIONS};
    use rusqlite::Connection;

    #[test]
    fn versions_are_strictly_increasing() {
        assert!(MIGRATIONS
            .windows(2)
            .all(|pair| pair[0].version < pair[1].version));
        assert_eq!(latest_version(), 2);
    }

    #[test]
    fn partially_migrated_database_resumes_at_next_step() {
        let mut conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(MIGRATIONS[0].sql).expect("apply first step");
        conn.execute_batch("PRAGMA user_version = 1;").expect("mark version");

        apply_migrations(&mut conn).expect("migrate");
        assert_eq!(user_version(&conn).expect("version"), latest_version());

        apply_migrations(&mut conn).expect("second run is a no-op");
    }
}
