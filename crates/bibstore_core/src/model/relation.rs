//! Relations: `(subject, predicate, object)` triples attached to items and
//! collections.
//!
//! # Invariants
//! - Predicates come from a fixed whitelist.
//! - Values are kept as a set per predicate, so ordering inside a JSON array
//!   never matters.
//! - `dc:relation` between items is bidirectional; the store mirrors it onto
//!   the target item.

use crate::model::key::ObjectKey;
use crate::model::library::LibraryType;
use crate::model::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const DC_RELATION: &str = "dc:relation";
pub const DC_REPLACES: &str = "dc:replaces";
pub const OWL_SAME_AS: &str = "owl:sameAs";

const ALLOWED_PREDICATES: &[&str] = &[DC_RELATION, DC_REPLACES, OWL_SAME_AS];
const BIDIRECTIONAL_PREDICATES: &[&str] = &[DC_RELATION];

static HTTP_URI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s/?#]+[^\s]*$").expect("valid uri regex"));

pub fn is_allowed_predicate(predicate: &str) -> bool {
    ALLOWED_PREDICATES.contains(&predicate)
}

pub fn is_bidirectional(predicate: &str) -> bool {
    BIDIRECTIONAL_PREDICATES.contains(&predicate)
}

pub fn bidirectional_predicates() -> &'static [&'static str] {
    BIDIRECTIONAL_PREDICATES
}

/// Predicate -> set of object URIs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationSet(BTreeMap<String, BTreeSet<String>>);

impl RelationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one value. Returns `false` when it was already present.
    pub fn insert(&mut self, predicate: impl Into<String>, object: impl Into<String>) -> bool {
        self.0
            .entry(predicate.into())
            .or_default()
            .insert(object.into())
    }

    /// Removes one value. Returns `false` when it was absent.
    pub fn remove(&mut self, predicate: &str, object: &str) -> bool {
        let Some(values) = self.0.get_mut(predicate) else {
            return false;
        };
        let removed = values.remove(object);
        if values.is_empty() {
            self.0.remove(predicate);
        }
        removed
    }

    pub fn contains(&self, predicate: &str, object: &str) -> bool {
        self.0
            .get(predicate)
            .is_some_and(|values| values.contains(object))
    }

    pub fn get(&self, predicate: &str) -> Option<&BTreeSet<String>> {
        self.0.get(predicate)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates `(predicate, object)` pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|(predicate, values)| {
            values
                .iter()
                .map(move |value| (predicate.as_str(), value.as_str()))
        })
    }

    /// Values of `predicate` present here but not in `other`.
    pub fn missing_from<'a>(&'a self, other: &RelationSet, predicate: &str) -> Vec<&'a str> {
        self.get(predicate)
            .map(|values| {
                values
                    .iter()
                    .filter(|value| !other.contains(predicate, value))
                    .map(String::as_str)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Checks predicates and value syntax. `uri_base` scopes item URIs for
    /// bidirectional predicates.
    pub fn validate(&self, uri_base: &str) -> Result<(), ValidationError> {
        for (predicate, values) in &self.0 {
            if !is_allowed_predicate(predicate) {
                return Err(ValidationError::UnsupportedPredicate(predicate.clone()));
            }
            for value in values {
                let well_formed = if is_bidirectional(predicate) {
                    ItemUri::parse(uri_base, value).is_some()
                } else {
                    HTTP_URI_RE.is_match(value)
                };
                if !well_formed {
                    return Err(ValidationError::InvalidRelationUri {
                        predicate: predicate.clone(),
                        uri: value.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Serialize for RelationSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (predicate, values) in &self.0 {
            if values.len() == 1 {
                if let Some(single) = values.iter().next() {
                    map.serialize_entry(predicate, single)?;
                }
            } else {
                map.serialize_entry(predicate, values)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RelationSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, OneOrMany>::deserialize(deserializer)?;
        let mut relations = RelationSet::new();
        for (predicate, value) in raw {
            let values = match value {
                OneOrMany::One(single) => vec![single],
                OneOrMany::Many(many) => many,
            };
            for value in values {
                relations.insert(predicate.clone(), value);
            }
        }
        Ok(relations)
    }
}

/// Item URI: `<base>/users/<id>/items/<KEY>` or `<base>/groups/<id>/items/<KEY>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemUri {
    pub library_type: LibraryType,
    pub external_id: i64,
    pub key: ObjectKey,
}

impl ItemUri {
    pub fn new(library_type: LibraryType, external_id: i64, key: ObjectKey) -> Self {
        Self {
            library_type,
            external_id,
            key,
        }
    }

    pub fn to_uri(&self, uri_base: &str) -> String {
        format!(
            "{}/{}/{}/items/{}",
            uri_base,
            self.library_type.uri_segment(),
            self.external_id,
            self.key
        )
    }

    pub fn parse(uri_base: &str, uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix(uri_base)?.strip_prefix('/')?;
        let mut parts = rest.split('/');
        let library_type = LibraryType::from_uri_segment(parts.next()?)?;
        let id_text = parts.next()?;
        if id_text.is_empty() || !id_text.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        let external_id = id_text.parse::<i64>().ok()?;
        if parts.next()? != "items" {
            return None;
        }
        let key = ObjectKey::parse(parts.next()?).ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(library_type, external_id, key))
    }
}
