//! Blob storage for large content bodies.
//!
//! # Responsibility
//! - Address bodies by `(library, key)` behind the `BlobStore` trait.
//! - Provide a filesystem implementation (`FsBlobStore`).
//!
//! # Invariants
//! - Blob writes are not transactional with the relational store; callers
//!   sequence them after the relational commit and surface failures.

use crate::model::key::ObjectKey;
use crate::model::library::LibraryId;
use log::debug;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub type BlobResult<T> = Result<T, BlobError>;

#[derive(Debug)]
pub enum BlobError {
    Io { path: PathBuf, source: std::io::Error },
}

impl Display for BlobError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "blob io failed at `{}`: {source}", path.display()),
        }
    }
}

impl Error for BlobError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
        }
    }
}

pub trait BlobStore: Send + Sync {
    fn put(&self, library_id: LibraryId, key: &ObjectKey, body: &[u8]) -> BlobResult<()>;
    fn get(&self, library_id: LibraryId, key: &ObjectKey) -> BlobResult<Option<Vec<u8>>>;
    /// Returns whether a blob was removed.
    fn delete(&self, library_id: LibraryId, key: &ObjectKey) -> BlobResult<bool>;
}

/// Stores each blob at `<root>/<library_id>/<key>`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, library_id: LibraryId, key: &ObjectKey) -> PathBuf {
        self.root.join(library_id.to_string()).join(key.as_str())
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, library_id: LibraryId, key: &ObjectKey, body: &[u8]) -> BlobResult<()> {
        let path = self.blob_path(library_id, key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
        }

        // Write-then-rename so readers never see a half-written body.
        let staging = path.with_extension("partial");
        std::fs::write(&staging, body).map_err(|source| io_error(&staging, source))?;
        std::fs::rename(&staging, &path).map_err(|source| io_error(&path, source))?;
        debug!(
            "event=blob_put module=storage status=ok library_id={library_id} key={key} bytes={}",
            body.len()
        );
        Ok(())
    }

    fn get(&self, library_id: LibraryId, key: &ObjectKey) -> BlobResult<Option<Vec<u8>>> {
        let path = self.blob_path(library_id, key);
        match std::fs::read(&path) {
            Ok(body) => Ok(Some(body)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(io_error(&path, source)),
        }
    }

    fn delete(&self, library_id: LibraryId, key: &ObjectKey) -> BlobResult<bool> {
        let path = self.blob_path(library_id, key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(io_error(&path, source)),
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> BlobError {
    BlobError::Io {
        path: path.to_path_buf(),
        source,
    }
}
