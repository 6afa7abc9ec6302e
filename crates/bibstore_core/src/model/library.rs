//! Libraries: the isolation boundary for versioned objects.
//!
//! # Invariants
//! - `(library_type, external_id)` identifies a library in object URIs.
//! - `version` only grows; every committed change stamps a larger value.

use crate::model::key::ObjectKey;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Internal library identifier.
pub type LibraryId = i64;

/// Acting user identifier.
pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryType {
    User,
    Group,
}

impl LibraryType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "group" => Some(Self::Group),
            _ => None,
        }
    }

    /// Path segment used in object URIs (`users` / `groups`).
    pub fn uri_segment(self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Group => "groups",
        }
    }

    pub fn from_uri_segment(value: &str) -> Option<Self> {
        match value {
            "users" => Some(Self::User),
            "groups" => Some(Self::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub library_id: LibraryId,
    pub library_type: LibraryType,
    /// User id for user libraries, group id for group libraries.
    pub external_id: i64,
    pub version: i64,
}

/// Membership role. Everything but `Reader` may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryRole {
    Owner,
    Admin,
    Member,
    Reader,
}

impl LibraryRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
            Self::Reader => "reader",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            "reader" => Some(Self::Reader),
            _ => None,
        }
    }

    pub fn can_write(self) -> bool {
        !matches!(self, Self::Reader)
    }
}

/// Identity on whose behalf a request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
}

impl Actor {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }
}

/// `(library, key)` pair carried by notifications.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LibraryKey {
    pub library_id: LibraryId,
    pub key: ObjectKey,
}

impl LibraryKey {
    pub fn new(library_id: LibraryId, key: ObjectKey) -> Self {
        Self { library_id, key }
    }
}

impl Display for LibraryKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.library_id, self.key)
    }
}
