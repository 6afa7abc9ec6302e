//! Saved search model.

use crate::config::CoreConfig;
use crate::model::key::ObjectKey;
use crate::model::library::LibraryId;
use crate::model::object::{ObjectType, VersionedObject};
use crate::model::ValidationError;
use serde::{Deserialize, Serialize};

pub const SEARCH_OPERATORS: &[&str] = &[
    "is",
    "isNot",
    "contains",
    "doesNotContain",
    "beginsWith",
    "isLessThan",
    "isGreaterThan",
    "isBefore",
    "isAfter",
    "isInTheLast",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCondition {
    pub condition: String,
    pub operator: String,
    #[serde(default)]
    pub value: String,
}

impl SearchCondition {
    pub fn new(
        condition: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            condition: condition.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSearch {
    #[serde(rename = "libraryID", default)]
    pub library_id: LibraryId,
    #[serde(default = "ObjectKey::generate")]
    pub key: ObjectKey,
    #[serde(default)]
    pub version: i64,
    pub name: String,
    pub conditions: Vec<SearchCondition>,
}

impl SavedSearch {
    pub fn new(
        library_id: LibraryId,
        name: impl Into<String>,
        conditions: Vec<SearchCondition>,
    ) -> Self {
        Self {
            library_id,
            key: ObjectKey::generate(),
            version: 0,
            name: name.into(),
            conditions,
        }
    }
}

impl VersionedObject for SavedSearch {
    const OBJECT_TYPE: ObjectType = ObjectType::Search;

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
            return Err(ValidationError::EmptyName("search"));
        }
        if self.conditions.is_empty() {
            return Err(ValidationError::InvalidCondition(
                "at least one condition is required".to_string(),
            ));
        }
        for condition in &self.conditions {
            if condition.condition.trim().is_empty() {
                return Err(ValidationError::InvalidCondition(
                    "condition name must not be empty".to_string(),
                ));
            }
            if !SEARCH_OPERATORS.contains(&condition.operator.as_str()) {
                return Err(ValidationError::InvalidCondition(format!(
                    "unsupported operator `{}`",
                    condition.operator
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{SavedSearch, SearchCondition};
    use crate::config::CoreConfig;
    use crate::model::object::VersionedObject;
    use crate::model::ValidationError;

    #[test]
    fn requires_conditions_with_known_operators() {
        let empty = SavedSearch::new(1, "Unread", vec![]);
        assert!(matches!(
            empty.validate(&CoreConfig::default()),
            Err(ValidationError::InvalidCondition(_))
        ));

        let bad = SavedSearch::new(1, "Unread", vec![SearchCondition::new("tag", "like", "x")]);
        assert!(matches!(
            bad.validate(&CoreConfig::default()),
            Err(ValidationError::InvalidCondition(_))
        ));

        let good = SavedSearch::new(
            1,
            "Unread",
            vec![SearchCondition::new("tag", "isNot", "read")],
        );
        good.validate(&CoreConfig::default())
            .expect("valid search should pass");
    }
}
