use serde_json::{json, Value};

use crate::error::{CatalogError, CatalogResult};
use crate::logic::mapper::{flatten_struct, join_path, KeyValues};
use crate::model::schema::{
    FieldKind, Schema, AUDIT_TRAIL_FIELD, ID_FIELD, METADATA_FIELD, NAME_FIELD, STATE_FIELD,
};
use crate::model::{generate_id, validate_name, Patch, PatchOperation, LAST_STATE_CHANGE_REASON};

/// A single physical write against the key-value store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyWrite {
    pub key: String,
    /// JSON text to store.
    pub value: String,
    /// JSON text the live value must equal for the write to proceed.
    pub prev_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedWrite {
    Add(KeyWrite),
    Update(KeyWrite),
    Delete(String),
}

/// Physical writes derived from a patch list, executed in the order
/// add, update, delete and finally the `State` write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WritePlan {
    pub add: Vec<KeyWrite>,
    pub update: Vec<KeyWrite>,
    pub delete: Vec<String>,
    pub state: Option<KeyWrite>,
}

impl WritePlan {
    /// Writes in execution order. The `State` write always comes last.
    pub fn writes(&self) -> Vec<PlannedWrite> {
        self.add
            .iter()
            .cloned()
            .map(PlannedWrite::Add)
            .chain(self.update.iter().cloned().map(PlannedWrite::Update))
            .chain(self.delete.iter().cloned().map(PlannedWrite::Delete))
            .chain(self.state.iter().cloned().map(PlannedWrite::Update))
            .collect()
    }
}

/// What a patch `field` path addresses inside an entity subtree.
#[derive(Debug, Clone)]
enum Target {
    Scalar { key: String },
    Struct { key: String, schema: &'static Schema },
    Collection { key: String, element: &'static Schema },
    Element { key: String, schema: &'static Schema },
}

/// Turn `patches` against the entity rooted at `base_path` into a write plan.
/// Pure: nothing is read or written.
pub fn translate(base_path: &str, schema: &'static Schema, patches: &[Patch]) -> CatalogResult<WritePlan> {
    let mut patches = patches.to_vec();
    if let Some(reason) = state_change_reason(schema, &patches) {
        patches.push(Patch::add(
            METADATA_FIELD,
            json!({
                "Id": LAST_STATE_CHANGE_REASON,
                "Key": LAST_STATE_CHANGE_REASON,
                "Value": reason,
            }),
        ));
    }

    let mut plan = WritePlan::default();
    for patch in &patches {
        translate_one(base_path, schema, patch, &mut plan)?;
    }
    Ok(plan)
}

fn state_change_reason(schema: &Schema, patches: &[Patch]) -> Option<String> {
    let message = patches
        .iter()
        .find(|p| p.operation == PatchOperation::Update && normalize_field(&p.field) == STATE_FIELD)
        .and_then(|p| p.message.clone())
        .filter(|m| !m.is_empty())?;

    if !schema.has_field(METADATA_FIELD) {
        log::debug!(
            "{} has no {} field, state change reason dropped",
            schema.type_name,
            METADATA_FIELD
        );
        return None;
    }
    Some(message)
}

fn normalize_field(field: &str) -> &str {
    field.trim_matches('/')
}

fn translate_one(
    base_path: &str,
    schema: &'static Schema,
    patch: &Patch,
    plan: &mut WritePlan,
) -> CatalogResult<()> {
    let field = normalize_field(&patch.field);
    if field.is_empty() {
        return Err(CatalogError::validation("field field is empty!"));
    }
    if patch.operation != PatchOperation::Delete && !patch.has_value() {
        return Err(CatalogError::validation("field value is empty!"));
    }

    check_writable_field(field, patch.operation)?;
    let target = resolve(base_path, schema, field)?;
    let value = patch.value.as_ref().unwrap_or(&Value::Null);

    match (patch.operation, target) {
        (PatchOperation::Update, Target::Scalar { key }) => {
            if field == NAME_FIELD {
                let name = value.as_str().ok_or_else(|| {
                    CatalogError::validation("field Name must be a string")
                })?;
                validate_name(name)?;
            }
            if field == STATE_FIELD && !value.is_string() {
                return Err(CatalogError::validation("field State must be a string"));
            }
            let write = KeyWrite {
                key,
                value: serde_json::to_string(value)?,
                prev_value: patch
                    .prev_value
                    .as_ref()
                    .map(|v| serde_json::to_string(v))
                    .transpose()?,
            };
            if field == STATE_FIELD {
                if plan.state.is_some() {
                    return Err(CatalogError::validation(
                        "field State can be updated only once per patch",
                    ));
                }
                plan.state = Some(write);
            } else {
                plan.update.push(write);
            }
        }
        (PatchOperation::Update, Target::Struct { key, schema } | Target::Element { key, schema }) => {
            if patch.prev_value.is_some() {
                return Err(CatalogError::validation(format!(
                    "prevValue is only supported for scalar fields, {} is a {}",
                    field, schema.type_name
                )));
            }
            if schema.is_keyed() {
                if let Some(id) = value.get(ID_FIELD).and_then(Value::as_str) {
                    if !key.ends_with(&format!("/{}", id)) {
                        return Err(CatalogError::validation(format!(
                            "Id {} does not match the addressed element {}",
                            id, field
                        )));
                    }
                }
            }
            let mut leaves = KeyValues::new();
            flatten_struct(&key, schema, value, &mut leaves)?;
            plan.update.extend(leaves.into_iter().map(|(key, value)| KeyWrite {
                key,
                value,
                prev_value: None,
            }));
        }
        (PatchOperation::Update, Target::Collection { .. }) => {
            return Err(CatalogError::validation(format!(
                "field {} is a collection, use add or delete",
                field
            )));
        }
        (PatchOperation::Add, Target::Collection { key, element }) => {
            let mut value = value.clone();
            let element_id = new_element_id(element, &mut value)?;
            let mut leaves = KeyValues::new();
            flatten_struct(&join_path(&key, &element_id), element, &value, &mut leaves)?;
            plan.add.extend(leaves.into_iter().map(|(key, value)| KeyWrite {
                key,
                value,
                prev_value: None,
            }));
        }
        (PatchOperation::Add, _) => {
            return Err(CatalogError::validation(format!(
                "add is only supported for collection fields, {} is not one",
                field
            )));
        }
        (PatchOperation::Delete, Target::Collection { key, .. } | Target::Element { key, .. }) => {
            plan.delete.push(key);
        }
        (PatchOperation::Delete, _) => {
            return Err(CatalogError::validation(format!(
                "delete is only supported for collections and their elements, {} is neither",
                field
            )));
        }
    }
    Ok(())
}

fn check_writable_field(field: &str, operation: PatchOperation) -> CatalogResult<()> {
    let top = field.split('/').next().unwrap_or_default();
    let last = field.rsplit('/').next().unwrap_or_default();
    if top == ID_FIELD || last == ID_FIELD {
        return Err(CatalogError::validation(format!("field {} is immutable", field)));
    }
    if top == AUDIT_TRAIL_FIELD {
        return Err(CatalogError::validation(format!(
            "field {} is maintained by the catalog",
            field
        )));
    }
    if field == STATE_FIELD && operation != PatchOperation::Update {
        return Err(CatalogError::validation(
            "field State can only be changed with an update",
        ));
    }
    Ok(())
}

fn resolve(base_path: &str, schema: &'static Schema, field: &str) -> CatalogResult<Target> {
    let unknown = || {
        CatalogError::validation(format!(
            "field {} does not exist in {}",
            field, schema.type_name
        ))
    };

    let mut target = Target::Struct {
        key: base_path.trim_end_matches('/').to_string(),
        schema,
    };
    for segment in field.split('/') {
        if segment.is_empty() {
            return Err(unknown());
        }
        target = match target {
            Target::Struct { key, schema } | Target::Element { key, schema } => {
                let descriptor = schema.field(segment).ok_or_else(unknown)?;
                let key = join_path(&key, segment);
                match descriptor.kind {
                    FieldKind::Scalar => Target::Scalar { key },
                    FieldKind::Nested(nested) => Target::Struct { key, schema: nested },
                    FieldKind::Collection(element) => Target::Collection { key, element },
                }
            }
            Target::Collection { key, element } => Target::Element {
                key: join_path(&key, segment),
                schema: element,
            },
            Target::Scalar { .. } => return Err(unknown()),
        };
    }
    Ok(target)
}

/// Key segment for an element about to be appended, assigning a fresh `Id`
/// when the element type is keyed and none was supplied. Reference elements
/// must name their target.
fn new_element_id(element: &Schema, value: &mut Value) -> CatalogResult<String> {
    let object = value.as_object_mut().ok_or_else(|| {
        CatalogError::validation(format!("{} value must be a JSON object", element.type_name))
    })?;
    if !element.is_keyed() {
        return Ok(generate_id());
    }
    match object.get(ID_FIELD) {
        Some(Value::String(id)) if !id.is_empty() => {
            if id.contains('/') {
                return Err(CatalogError::validation(format!(
                    "{} Id '{}' cannot be used as a key",
                    element.type_name, id
                )));
            }
            Ok(id.clone())
        }
        _ if element.references => Err(CatalogError::validation(format!(
            "{} value must have a non-empty Id",
            element.type_name
        ))),
        _ => {
            let id = generate_id();
            object.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            Ok(id)
        }
    }
}
