//! Collection model.

use crate::config::CoreConfig;
use crate::model::key::ObjectKey;
use crate::model::library::LibraryId;
use crate::model::object::{ObjectType, VersionedObject};
use crate::model::relation::RelationSet;
use crate::model::ValidationError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    #[serde(rename = "libraryID", default)]
    pub library_id: LibraryId,
    #[serde(default = "ObjectKey::generate")]
    pub key: ObjectKey,
    #[serde(default)]
    pub version: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_collection: Option<ObjectKey>,
    #[serde(default)]
    pub relations: RelationSet,
}

impl Collection {
    pub fn new(library_id: LibraryId, name: impl Into<String>) -> Self {
        Self {
            library_id,
            key: ObjectKey::generate(),
            version: 0,
            name: name.into(),
            parent_collection: None,
            relations: RelationSet::new(),
        }
    }
}

impl VersionedObject for Collection {
    const OBJECT_TYPE: ObjectType = ObjectType::Collection;

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

    fn validate(&self, config: &CoreConfig) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName("collection"));
        }
        if self.parent_collection.as_ref() == Some(&self.key) {
            return Err(ValidationError::InvalidReference(format!(
                "collection {} cannot be its own parent",
                self.key
            )));
        }
        self.relations.validate(&config.uri_base)
    }
}
