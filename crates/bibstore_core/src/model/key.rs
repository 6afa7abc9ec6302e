//! Object keys.
//!
//! Keys are 8 characters drawn from an alphabet without ambiguous glyphs
//! (`0`, `1`, `O`). They are unique among live objects of one type within a
//! library and are retained by tombstones.

use crate::model::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub const KEY_ALPHABET: &[u8] = b"23456789ABCDEFGHIJKLMNPQRSTUVWXYZ";
pub const KEY_LENGTH: usize = 8;

/// Opaque fixed-length object key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Generates a fresh random key.
    pub fn generate() -> Self {
        let bytes = Uuid::new_v4().into_bytes();
        let key = bytes
            .iter()
            .take(KEY_LENGTH)
            .map(|byte| KEY_ALPHABET[usize::from(*byte) % KEY_ALPHABET.len()] as char)
            .collect();
        Self(key)
    }

    /// Parses and validates a key.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        if is_valid_key(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(ValidationError::InvalidKey(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if is_valid_key(&value) {
            Ok(Self(value))
        } else {
            Err(ValidationError::InvalidKey(value))
        }
    }
}

impl From<ObjectKey> for String {
    fn from(value: ObjectKey) -> Self {
        value.0
    }
}

fn is_valid_key(value: &str) -> bool {
    value.len() == KEY_LENGTH && value.bytes().all(|byte| KEY_ALPHABET.contains(&byte))
}
