//! Capabilities shared by all versioned object types.

use crate::config::CoreConfig;
use crate::model::key::ObjectKey;
use crate::model::library::{LibraryId, LibraryKey};
use crate::model::ValidationError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Item,
    Collection,
    Search,
    Tag,
}

impl ObjectType {
    pub const ALL: [ObjectType; 4] = [Self::Item, Self::Collection, Self::Search, Self::Tag];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Collection => "collection",
            Self::Search => "search",
            Self::Tag => "tag",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "item" => Some(Self::Item),
            "collection" => Some(Self::Collection),
            "search" => Some(Self::Search),
            "tag" => Some(Self::Tag),
            _ => None,
        }
    }

    /// Table holding live rows of this type.
    pub(crate) fn table(self) -> &'static str {
        match self {
            Self::Item => "items",
            Self::Collection => "collections",
            Self::Search => "saved_searches",
            Self::Tag => "tags",
        }
    }
}

impl Display for ObjectType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared shape of items, collections, saved searches and tags.
///
/// `same_content` ignores `version`, so re-submitting an object's own
/// fetched JSON is recognized as unchanged.
pub trait VersionedObject: Clone + PartialEq + Serialize + DeserializeOwned {
    const OBJECT_TYPE: ObjectType;

    fn library_id(&self) -> LibraryId;
    fn set_library_id(&mut self, library_id: LibraryId);
    fn key(&self) -> &ObjectKey;
    fn version(&self) -> i64;
    fn set_version(&mut self, version: i64);

    /// Canonicalizes user input before validation and comparison.
    fn normalize(&mut self) {}

    /// Checks field invariants that need no storage access.
    fn validate(&self, config: &CoreConfig) -> Result<(), ValidationError>;

    fn library_key(&self) -> LibraryKey {
        LibraryKey::new(self.library_id(), self.key().clone())
    }

    fn same_content(&self, other: &Self) -> bool {
        let mut left = self.clone();
        let mut right = other.clone();
        left.set_version(0);
        right.set_version(0);
        left == right
    }
}
