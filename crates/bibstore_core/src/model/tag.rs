//! Tag model.
//!
//! Tags are versioned objects of their own; items reference them by
//! `(name, type)` and the store resolves or creates the tag object.

use crate::config::CoreConfig;
use crate::model::key::ObjectKey;
use crate::model::library::LibraryId;
use crate::model::object::{ObjectType, VersionedObject};
use crate::model::ValidationError;
use serde::{Deserialize, Serialize};

pub const TAG_NAME_MAX_CHARS: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    #[serde(rename = "libraryID", default)]
    pub library_id: LibraryId,
    #[serde(default = "ObjectKey::generate")]
    pub key: ObjectKey,
    #[serde(default)]
    pub version: i64,
    pub name: String,
    #[serde(rename = "type", default)]
    pub tag_type: i64,
}

impl Tag {
    pub fn new(library_id: LibraryId, name: impl Into<String>, tag_type: i64) -> Self {
        Self {
            library_id,
            key: ObjectKey::generate(),
            version: 0,
            name: name.into(),
            tag_type,
        }
    }
}

impl VersionedObject for Tag {
    const OBJECT_TYPE: ObjectType = ObjectType::Tag;

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

    fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
    }

    fn validate(&self, _config: &CoreConfig) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName("tag"));
        }
        if self.name.chars().count() > TAG_NAME_MAX_CHARS {
            return Err(ValidationError::InvalidTag(format!(
                "tag name exceeds {TAG_NAME_MAX_CHARS} characters"
            )));
        }
        if !(0..=1).contains(&self.tag_type) {
            return Err(ValidationError::InvalidTag(format!(
                "unsupported tag type {}",
                self.tag_type
            )));
        }
        Ok(())
    }
}
