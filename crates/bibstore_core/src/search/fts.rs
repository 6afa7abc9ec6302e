//! SQLite FTS5-backed full-text index.
//!
//! # Responsibility
//! - Hold item bodies in an FTS5 table on a dedicated connection.
//! - Translate user text into a phrase-prefix match expression.
//!
//! # Invariants
//! - At most one entry per `(library_id, item_key)`.
//! - Result ordering is deterministic by rank and item key.

use crate::model::key::ObjectKey;
use crate::model::library::LibraryId;
use crate::search::{FulltextHit, FulltextIndex, SearchError, SearchResult};
use log::debug;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

const CREATE_INDEX_SQL: &str = "CREATE VIRTUAL TABLE IF NOT EXISTS fulltext_index USING fts5(
    library_id UNINDEXED,
    item_key UNINDEXED,
    content
);";

pub struct SqliteFulltextIndex {
    conn: Mutex<Connection>,
}

impl SqliteFulltextIndex {
    /// Opens (or creates) an index database file.
    pub fn open(path: impl AsRef<Path>) -> SearchResult<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> SearchResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> SearchResult<Self> {
        conn.execute_batch(CREATE_INDEX_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FulltextIndex for SqliteFulltextIndex {
    fn index(
        &self,
        library_id: LibraryId,
        item_key: &ObjectKey,
        content: &str,
    ) -> SearchResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM fulltext_index WHERE library_id = ?1 AND item_key = ?2;",
            params![library_id, item_key.as_str()],
        )?;
        tx.execute(
            "INSERT INTO fulltext_index (library_id, item_key, content) VALUES (?1, ?2, ?3);",
            params![library_id, item_key.as_str(), content],
        )?;
        tx.commit()?;
        debug!(
            "event=fulltext_index module=search status=ok library_id={library_id} key={item_key} chars={}",
            content.chars().count()
        );
        Ok(())
    }

    fn remove(&self, library_id: LibraryId, item_key: &ObjectKey) -> SearchResult<bool> {
        let removed = self.lock().execute(
            "DELETE FROM fulltext_index WHERE library_id = ?1 AND item_key = ?2;",
            params![library_id, item_key.as_str()],
        )?;
        Ok(removed > 0)
    }

    fn search(
        &self,
        library_id: LibraryId,
        query: &str,
        limit: u32,
    ) -> SearchResult<Vec<FulltextHit>> {
        let Some(match_expr) = build_match_expression(query) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT library_id, item_key,
                    snippet(fulltext_index, 2, '[', ']', ' ... ', 10) AS snippet
             FROM fulltext_index
             WHERE fulltext_index MATCH ?1 AND library_id = ?2
             ORDER BY bm25(fulltext_index), item_key ASC
             LIMIT ?3;",
        )?;
        let mut rows = stmt
            .query(params![match_expr, library_id, i64::from(limit)])
            .map_err(|err| map_query_error(err, &match_expr))?;

        let mut hits = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| map_query_error(err, &match_expr))?
        {
            hits.push(parse_hit(row)?);
        }
        Ok(hits)
    }
}

fn parse_hit(row: &Row<'_>) -> SearchResult<FulltextHit> {
    let key_text: String = row.get("item_key")?;
    let item_key = ObjectKey::parse(&key_text)
        .map_err(|_| SearchError::InvalidData(format!("invalid item key `{key_text}`")))?;
    Ok(FulltextHit {
        library_id: row.get("library_id")?,
        item_key,
        snippet: row.get("snippet")?,
    })
}

/// Quotes the whitespace-normalized text as one phrase and allows the last
/// token to match as a prefix.
fn build_match_expression(text: &str) -> Option<String> {
    let phrase = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if phrase.is_empty() {
        return None;
    }
    Some(format!("\"{}\" *", phrase.replace('"', "\"\"")))
}

fn map_query_error(err: rusqlite::Error, query: &str) -> SearchError {
    if is_match_syntax_error(&err) {
        return SearchError::InvalidQuery {
            query: query.to_string(),
            message: err.to_string(),
        };
    }
    SearchError::from(err)
}

fn is_match_syntax_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => {
            let msg = message.to_lowercase();
            (msg.contains("fts5") && msg.contains("syntax"))
                || msg.contains("malformed match expression")
                || msg.contains("unterminated")
        }
        _ => false,
    }
}
