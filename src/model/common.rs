use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CatalogError, CatalogResult};

pub type Id = String;

pub const MAX_NAME_LENGTH: usize = 63;

/// Metadata key recording the human-readable reason of the last state change.
pub const LAST_STATE_CHANGE_REASON: &str = "LAST_STATE_CHANGE_REASON";

/// Metadata key on a service Instance naming the plan it was provisioned from.
pub const PLAN_ID_METADATA: &str = "PLAN_ID";

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// Free-form key/value pair attached to catalog entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Metadata {
    pub id: Id,
    pub key: String,
    pub value: String,
}

impl Metadata {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            key: key.into(),
            value: value.into(),
        }
    }
}

pub fn find_metadata<'a>(metadata: &'a [Metadata], key: &str) -> Option<&'a str> {
    metadata
        .iter()
        .find(|m| m.key == key)
        .map(|m| m.value.as_str())
}

/// Who created the entity and who touched it last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AuditTrail {
    pub created_on: DateTime<Utc>,
    pub created_by: String,
    pub last_updated_on: DateTime<Utc>,
    pub last_update_by: String,
}

impl AuditTrail {
    pub fn new(actor: &str) -> Self {
        let now = Utc::now();
        Self {
            created_on: now,
            created_by: actor.to_string(),
            last_updated_on: now,
            last_update_by: actor.to_string(),
        }
    }
}

/// Names must be lowercase DNS labels: a letter first, then letters,
/// digits or dashes, not ending with a dash, at most 63 characters.
pub fn validate_name(name: &str) -> CatalogResult<()> {
    let bytes = name.as_bytes();
    let valid = !bytes.is_empty()
        && bytes.len() <= MAX_NAME_LENGTH
        && bytes[0].is_ascii_lowercase()
        && bytes[bytes.len() - 1] != b'-'
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-');

    if valid {
        Ok(())
    } else {
        Err(CatalogError::validation(format!(
            "field Name has incorrect value: '{}', expected a lowercase DNS label",
            name
        )))
    }
}
