//! Library-owned domain model.
//!
//! # Responsibility
//! - Define the versioned object shapes (item, collection, saved search, tag)
//!   shared by stores, sync upload and cache serialization.
//! - Enforce field invariants that need no database access.
//!
//! # Invariants
//! - Every object is identified by `(library_id, key)`.
//! - Deletion is represented by tombstones in `deleted_objects`, never by a
//!   flag on the live row (the item `deleted` flag is the trash, not deletion).

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod collection;
pub mod item;
pub mod key;
pub mod library;
pub mod object;
pub mod relation;
pub mod saved_search;
pub mod tag;

/// Field-level validation failure. Always surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Object key is not an 8-character key from the key alphabet.
    InvalidKey(String),
    /// `itemType` is not in the supported item type list.
    UnknownItemType(String),
    /// Relation predicate is not whitelisted.
    UnsupportedPredicate(String),
    /// Relation value is not a well-formed URI for its predicate.
    InvalidRelationUri { predicate: String, uri: String },
    /// Object relates to itself.
    SelfRelation(String),
    /// Required name is blank.
    EmptyName(&'static str),
    /// Field name or value is not acceptable.
    InvalidField(String),
    /// Tag name or type is not acceptable.
    InvalidTag(String),
    /// Saved search condition uses an unknown operator or is empty.
    InvalidCondition(String),
    /// Parent/child or membership reference is not acceptable.
    InvalidReference(String),
    /// Input JSON does not decode into the object shape.
    Malformed(String),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKey(value) => write!(f, "invalid object key `{value}`"),
            Self::UnknownItemType(value) => write!(f, "unknown item type `{value}`"),
            Self::UnsupportedPredicate(value) => {
                write!(f, "unsupported relation predicate `{value}`")
            }
            Self::InvalidRelationUri { predicate, uri } => {
                write!(f, "invalid `{predicate}` relation value `{uri}`")
            }
            Self::SelfRelation(key) => write!(f, "object {key} cannot be related to itself"),
            Self::EmptyName(kind) => write!(f, "{kind} name must not be empty"),
            Self::InvalidField(message) => write!(f, "invalid field: {message}"),
            Self::InvalidTag(message) => write!(f, "invalid tag: {message}"),
            Self::InvalidCondition(message) => write!(f, "invalid search condition: {message}"),
            Self::InvalidReference(message) => write!(f, "invalid reference: {message}"),
            Self::Malformed(message) => write!(f, "malformed object: {message}"),
        }
    }
}

impl Error for ValidationError {}
