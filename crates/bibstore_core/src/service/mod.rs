//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate stores, access checks and units of work into the
//!   operations the sync API exposes.
//! - Keep callers (CLI, future API layers) decoupled from SQL details.

pub mod fulltext;
pub mod sync;
pub mod upload;

pub use fulltext::{FulltextError, FulltextService, ItemFulltext};
pub use sync::{LibraryChanges, SyncService};
pub use upload::{
    UploadAction, UploadEntry, UploadFailure, UploadProcessor, UploadReport, UploadSuccess,
};
