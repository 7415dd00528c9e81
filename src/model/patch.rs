use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOperation {
    #[serde(alias = "Add", alias = "ADD")]
    Add,
    #[serde(alias = "Update", alias = "UPDATE")]
    Update,
    #[serde(alias = "Delete", alias = "DELETE")]
    Delete,
}

/// One field-level mutation, as sent in a PATCH body:
/// `{"op": "update", "field": "State", "value": "running", "prevValue": "starting"}`.
///
/// `field` is a slash-separated path through the entity schema, e.g.
/// `State`, `Metadata`, `Metadata/<id>` or `Bindings/<id>/Data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    #[serde(rename = "op")]
    pub operation: PatchOperation,
    #[serde(default)]
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_value: Option<Value>,
    /// Human-readable reason, recorded when the patch changes `State`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Patch {
    fn new(operation: PatchOperation, field: &str, value: Option<Value>) -> Self {
        Self {
            operation,
            field: field.to_string(),
            value,
            prev_value: None,
            message: None,
        }
    }

    pub fn add(field: &str, value: Value) -> Self {
        Self::new(PatchOperation::Add, field, Some(value))
    }

    pub fn update(field: &str, value: Value) -> Self {
        Self::new(PatchOperation::Update, field, Some(value))
    }

    pub fn delete(field: &str) -> Self {
        Self::new(PatchOperation::Delete, field, None)
    }

    pub fn with_prev_value(mut self, prev_value: Value) -> Self {
        self.prev_value = Some(prev_value);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Null and `""` count as missing.
    pub fn has_value(&self) -> bool {
        match &self.value {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }
}
