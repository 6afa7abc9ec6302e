//! Item model.
//!
//! # Invariants
//! - `item_type` is one of [`ITEM_TYPES`].
//! - Only `note` and `attachment` items may have a parent; only `note` items
//!   carry a `note` body.
//! - Tags are identified by `(name, type)`; names are trimmed and non-empty.

use crate::config::CoreConfig;
use crate::model::key::ObjectKey;
use crate::model::library::LibraryId;
use crate::model::object::{ObjectType, VersionedObject};
use crate::model::relation::RelationSet;
use crate::model::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const ITEM_TYPES: &[&str] = &[
    "artwork",
    "attachment",
    "blogPost",
    "book",
    "bookSection",
    "conferencePaper",
    "document",
    "journalArticle",
    "magazineArticle",
    "newspaperArticle",
    "note",
    "report",
    "thesis",
    "webpage",
];

pub const NOTE_ITEM_TYPE: &str = "note";
pub const ATTACHMENT_ITEM_TYPE: &str = "attachment";

pub fn is_regular_type(item_type: &str) -> bool {
    item_type != NOTE_ITEM_TYPE && item_type != ATTACHMENT_ITEM_TYPE
}

static FIELD_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9]*$").expect("valid field name regex"));

/// Tag reference carried inside item JSON.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemTag {
    pub tag: String,
    /// `0` manual, `1` automatic.
    #[serde(rename = "type", default)]
    pub tag_type: i64,
}

impl ItemTag {
    pub fn manual(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            tag_type: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(rename = "libraryID", default)]
    pub library_id: LibraryId,
    #[serde(default = "ObjectKey::generate")]
    pub key: ObjectKey,
    #[serde(default)]
    pub version: i64,
    pub item_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_item: Option<ObjectKey>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default)]
    pub collections: BTreeSet<ObjectKey>,
    #[serde(default)]
    pub tags: BTreeSet<ItemTag>,
    #[serde(default)]
    pub relations: RelationSet,
    /// Trash flag. A trashed item is still live; deletion is a tombstone.
    #[serde(default)]
    pub deleted: bool,
}

impl Item {
    /// Creates an unsaved item with a generated key.
    pub fn new(library_id: LibraryId, item_type: impl Into<String>) -> Self {
        Self::with_key(library_id, ObjectKey::generate(), item_type)
    }

    /// Creates an unsaved item with a caller-provided key (sync/import paths).
    pub fn with_key(library_id: LibraryId, key: ObjectKey, item_type: impl Into<String>) -> Self {
        Self {
            library_id,
            key,
            version: 0,
            item_type: item_type.into(),
            parent_item: None,
            fields: BTreeMap::new(),
            note: None,
            collections: BTreeSet::new(),
            tags: BTreeSet::new(),
            relations: RelationSet::new(),
            deleted: false,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.fields.get("title").map(String::as_str)
    }

    /// Regular items are everything that is not a note or an attachment.
    pub fn is_regular(&self) -> bool {
        is_regular_type(&self.item_type)
    }
}

impl VersionedObject for Item {
    const OBJECT_TYPE: ObjectType = ObjectType::Item;

    fn library_id(&self) -> LibraryId {
        self.library_id
    }

    fn set_library_id(&mut self, library_id: LibraryId) {
        self.library_id = library_id;
    }

    fn key(&self) -> &ObjectKey {
        &self.key
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    /// Trims tag names and drops empty field values.
    fn normalize(&mut self) {
        self.tags = std::mem::take(&mut self.tags)
            .into_iter()
            .map(|tag| ItemTag {
                tag: tag.tag.trim().to_string(),
                tag_type: tag.tag_type,
            })
            .collect();
        self.fields.retain(|_, value| !value.is_empty());
    }

    fn validate(&self, config: &CoreConfig) -> Result<(), ValidationError> {
        if !ITEM_TYPES.contains(&self.item_type.as_str()) {
            return Err(ValidationError::UnknownItemType(self.item_type.clone()));
        }
        if self.parent_item.is_some() && self.is_regular() {
            return Err(ValidationError::InvalidReference(format!(
                "{} items cannot have a parent item",
                self.item_type
            )));
        }
        if self.parent_item.as_ref() == Some(&self.key) {
            return Err(ValidationError::InvalidReference(format!(
                "item {} cannot be its own parent",
                self.key
            )));
        }
        if self.note.is_some() && self.item_type != NOTE_ITEM_TYPE {
            return Err(ValidationError::InvalidField(format!(
                "`note` is only valid for note items, not {}",
                self.item_type
            )));
        }
        if let Some(name) = self
            .fields
            .keys()
            .find(|name| !FIELD_NAME_RE.is_match(name))
        {
            return Err(ValidationError::InvalidField(format!(
                "field name `{name}` is not valid"
            )));
        }
        for tag in &self.tags {
            if tag.tag.trim().is_empty() {
                return Err(ValidationError::InvalidTag("tag name must not be empty".to_string()));
            }
            if !(0..=1).contains(&tag.tag_type) {
                return Err(ValidationError::InvalidTag(format!(
                    "tag `{}` has unsupported type {}",
                    tag.tag, tag.tag_type
                )));
            }
        }
        self.relations.validate(&config.uri_base)
    }
}
