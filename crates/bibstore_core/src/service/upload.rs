//! Batch upload of client changes.
//!
//! # Responsibility
//! - Apply a list of create/update/delete entries across object types.
//! - Report every entry by its input position without aborting the batch.
//!
//! # Invariants
//! - Each entry runs in its own unit of work; a failing entry leaves no
//!   trace in the store, cache or notification stream.
//! - Write access is checked per entry against the entry's library.

use crate::model::key::ObjectKey;
use crate::model::library::{Actor, LibraryId};
use crate::model::object::{ObjectType, VersionedObject};
use crate::model::ValidationError;
use crate::repo::{
    CollectionStore, ItemStore, LibraryRepo, ObjectStore, RepoError, RepoResult, SearchStore,
    TagStore,
};
use crate::txn::{DataContext, Session, UnitOfWork};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadAction {
    Create,
    Update,
    Delete,
}

impl UploadAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// One client change.
///
/// `version` is the version the client last saw. For updates it falls back
/// to the `version` field inside `data`; creates always require that the key
/// is not live.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEntry {
    #[serde(rename = "libraryID")]
    pub library_id: LibraryId,
    pub object_type: ObjectType,
    pub action: UploadAction,
    #[serde(default)]
    pub key: Option<ObjectKey>,
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadSuccess {
    pub key: ObjectKey,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFailure {
    pub object_type: ObjectType,
    pub key: Option<ObjectKey>,
    pub code: String,
    pub status: u16,
    pub message: String,
}

/// Positional outcome of a batch. Every input index lands in exactly one map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub successful: BTreeMap<usize, UploadSuccess>,
    pub unchanged: BTreeMap<usize, ObjectKey>,
    pub failed: BTreeMap<usize, UploadFailure>,
}

impl UploadReport {
    pub fn len(&self) -> usize {
        self.successful.len() + self.unchanged.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum EntryOutcome {
    Changed(UploadSuccess),
    Unchanged(ObjectKey),
}

pub struct UploadProcessor;

impl UploadProcessor {
    pub fn process(session: &mut Session<'_>, actor: Actor, entries: &[UploadEntry]) -> UploadReport {
        let started_at = Instant::now();
        let mut report = UploadReport::default();

        for (index, entry) in entries.iter().enumerate() {
            match session.transaction(|uow| apply_entry(uow, actor, entry)) {
                Ok(EntryOutcome::Changed(success)) => {
                    info!(
                        "event=upload_entry module=service status=ok index={index} action={} object_type={} library_id={} key={} version={}",
                        entry.action.as_str(),
                        entry.object_type,
                        entry.library_id,
                        success.key,
                        success.version
                    );
                    report.successful.insert(index, success);
                }
                Ok(EntryOutcome::Unchanged(key)) => {
                    info!(
                        "event=upload_entry module=service status=unchanged index={index} action={} object_type={} library_id={} key={key}",
                        entry.action.as_str(),
                        entry.object_type,
                        entry.library_id
                    );
                    report.unchanged.insert(index, key);
                }
                Err(err) => {
                    warn!(
                        "event=upload_entry module=service status=error index={index} action={} object_type={} library_id={} error_code={} error={err}",
                        entry.action.as_str(),
                        entry.object_type,
                        entry.library_id,
                        err.code()
                    );
                    report.failed.insert(
                        index,
                        UploadFailure {
                            object_type: entry.object_type,
                            key: reported_key(entry),
                            code: err.code().to_string(),
                            status: err.status(),
                            message: err.to_string(),
                        },
                    );
                }
            }
        }

        info!(
            "event=upload_batch module=service status=ok entries={} successful={} unchanged={} failed={} duration_ms={}",
            entries.len(),
            report.successful.len(),
            report.unchanged.len(),
            report.failed.len(),
            started_at.elapsed().as_millis()
        );
        report
    }
}

fn apply_entry(uow: &mut UnitOfWork<'_>, actor: Actor, entry: &UploadEntry) -> RepoResult<EntryOutcome> {
    LibraryRepo::new(uow.conn()).require_write(entry.library_id, actor)?;
    match entry.object_type {
        ObjectType::Item => apply_typed::<ItemStore>(uow, entry),
        ObjectType::Collection => apply_typed::<CollectionStore>(uow, entry),
        ObjectType::Search => apply_typed::<SearchStore>(uow, entry),
        ObjectType::Tag => apply_typed::<TagStore>(uow, entry),
    }
}

fn apply_typed<S: ObjectStore>(uow: &mut UnitOfWork<'_>, entry: &UploadEntry) -> RepoResult<EntryOutcome> {
    if entry.action == UploadAction::Delete {
        let key = entry.key.as_ref().ok_or_else(|| {
            RepoError::from(ValidationError::InvalidField(
                "delete requires a key".to_string(),
            ))
        })?;
        let version = S::delete(uow, entry.library_id, key, entry.version)?;
        return Ok(EntryOutcome::Changed(UploadSuccess {
            key: key.clone(),
            version,
        }));
    }

    let object = decode_object::<S::Object>(entry)?;
    let expected_version = match entry.action {
        UploadAction::Create => Some(0),
        _ => entry
            .version
            .or_else(|| (object.version() > 0).then_some(object.version())),
    };

    let outcome = S::save(uow, object, expected_version)?;
    if outcome.changed {
        Ok(EntryOutcome::Changed(UploadSuccess {
            key: outcome.key,
            version: outcome.version,
        }))
    } else {
        Ok(EntryOutcome::Unchanged(outcome.key))
    }
}

/// Entry key, or the payload key when only `data` names it.
fn reported_key(entry: &UploadEntry) -> Option<ObjectKey> {
    entry.key.clone().or_else(|| {
        entry
            .data
            .as_ref()
            .and_then(|data| data.get("key"))
            .and_then(Value::as_str)
            .and_then(|key| ObjectKey::parse(key).ok())
    })
}

/// Decodes `data`, taking the key from the entry when the payload has none.
fn decode_object<T: VersionedObject>(entry: &UploadEntry) -> RepoResult<T> {
    let mut data = match &entry.data {
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return Err(ValidationError::Malformed("data must be a JSON object".to_string()).into())
        }
        None => {
            return Err(ValidationError::Malformed(format!(
                "{} requires data",
                entry.action.as_str()
            ))
            .into())
        }
    };

    if let Some(key) = &entry.key {
        match data.get("key") {
            None => {
                data.insert("key".to_string(), Value::String(key.as_str().to_string()));
            }
            Some(Value::String(value)) if value == key.as_str() => {}
            Some(other) => {
                return Err(ValidationError::InvalidField(format!(
                    "payload key {other} does not match entry key {key}"
                ))
                .into());
            }
        }
    } else if entry.action == UploadAction::Update && !data.contains_key("key") {
        return Err(ValidationError::InvalidField("update requires a key".to_string()).into());
    }

    let mut object = serde_json::from_value::<T>(Value::Object(data))
        .map_err(|err| RepoError::from(ValidationError::Malformed(err.to_string())))?;
    object.set_library_id(entry.library_id);
    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::{decode_object, reported_key, UploadAction, UploadEntry};
    use crate::model::key::ObjectKey;
    use crate::model::object::{ObjectType, VersionedObject};
    use crate::model::tag::Tag;
    use crate::model::ValidationError;
    use crate::repo::RepoError;
    use serde_json::json;

    fn entry(key: Option<&str>, data: serde_json::Value) -> UploadEntry {
        UploadEntry {
            library_id: 7,
            object_type: ObjectType::Tag,
            action: UploadAction::Update,
            key: key.map(|value| ObjectKey::parse(value).expect("valid key")),
            version: None,
            data: Some(data),
        }
    }

    #[test]
    fn entry_key_and_library_are_injected() {
        let tag: Tag = decode_object(&entry(Some("ABCD2345"), json!({"name": "physics"})))
            .expect("decode tag");
        assert_eq!(tag.key().as_str(), "ABCD2345");
        assert_eq!(tag.library_id(), 7);
    }

    #[test]
    fn mismatched_payload_key_is_rejected() {
        let err = decode_object::<Tag>(&entry(
            Some("ABCD2345"),
            json!({"key": "WXYZ6789", "name": "physics"}),
        ))
        .expect_err("key mismatch must fail");
        assert!(matches!(
            err,
            RepoError::Validation(ValidationError::InvalidField(_))
        ));
    }

    #[test]
    fn undecodable_payload_is_malformed() {
        let err = decode_object::<Tag>(&entry(Some("ABCD2345"), json!({"name": 12})))
            .expect_err("wrong field type must fail");
        assert!(matches!(
            err,
            RepoError::Validation(ValidationError::Malformed(_))
        ));
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn entries_deserialize_from_wire_shape() {
        let parsed: Vec<UploadEntry> = serde_json::from_value(json!([
            {"libraryID": 1, "objectType": "item", "action": "create",
             "data": {"itemType": "book"}},
            {"libraryID": 1, "objectType": "tag", "action": "delete",
             "key": "ABCD2345", "version": 4}
        ]))
        .expect("parse entries");
        assert_eq!(parsed[0].action, UploadAction::Create);
        assert_eq!(parsed[1].object_type, ObjectType::Tag);
        assert_eq!(parsed[1].version, Some(4));
    }

    #[test]
    fn failures_report_the_payload_key_when_the_entry_has_none() {
        let from_payload = entry(None, json!({"key": "ABCD2345", "name": "physics"}));
        assert_eq!(
            reported_key(&from_payload).map(|key| key.as_str().to_string()),
            Some("ABCD2345".to_string())
        );

        let from_entry = entry(Some("WXYZ6789"), json!({"key": "ABCD2345"}));
        assert_eq!(
            reported_key(&from_entry).map(|key| key.as_str().to_string()),
            Some("WXYZ6789".to_string())
        );

        assert!(reported_key(&entry(None, json!({"key": "not a key"}))).is_none());
    }
}
