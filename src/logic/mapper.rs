//! Entity <-> hierarchical key-value mapping.
//!
//! An entity with id `I` under base path `B` is stored as the subtree
//! `B/I/`. Scalars become leaves holding their JSON text, nested structs
//! recurse into `B/I/<Field>/`, and collections store one subtree per
//! element under `B/I/<Field>/<elementId>/` (the element ordinal when the
//! element schema has no `Id`). Keyed collections read back ordered by
//! element key.

use itertools::Itertools;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use crate::error::{CatalogError, CatalogResult};
use crate::model::schema::{FieldKind, Schema, ID_FIELD};
use crate::model::{generate_id, Entity};
use crate::store::KvNode;

pub type KeyValues = BTreeMap<String, String>;

pub fn join_path(base: &str, segment: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), segment)
}

/// Flatten `entity` into the leaves of its subtree under `base_path/<Id>/`.
pub fn to_key_values<T: Entity>(base_path: &str, entity: &T) -> CatalogResult<KeyValues> {
    let id = entity.id();
    check_segment(T::schema(), id)?;
    let value = serde_json::to_value(entity)?;
    let mut out = KeyValues::new();
    flatten_struct(&join_path(base_path, id), T::schema(), &value, &mut out)?;
    Ok(out)
}

/// Rebuild an entity from the recursive read of its subtree.
pub fn from_node<T: Entity>(node: &KvNode) -> CatalogResult<T> {
    if !node.dir {
        return Err(CatalogError::internal(format!(
            "{} is not a {} subtree",
            node.key,
            T::KIND
        )));
    }
    let value = unflatten_struct(node, T::schema())?;
    serde_json::from_value(value).map_err(|e| {
        CatalogError::internal(format!("cannot decode {} at {}: {}", T::KIND, node.key, e))
    })
}

/// Flatten a JSON object laid out by `schema` into leaves rooted at `path`.
/// Unknown fields and malformed collections are rejected.
pub fn flatten_struct(
    path: &str,
    schema: &Schema,
    value: &Value,
    out: &mut KeyValues,
) -> CatalogResult<()> {
    let object = value.as_object().ok_or_else(|| {
        CatalogError::validation(format!("{} value must be a JSON object", schema.type_name))
    })?;

    if let Some(unknown) = object.keys().find(|k| !schema.has_field(k)) {
        return Err(CatalogError::validation(format!(
            "field {} does not exist in {}",
            unknown, schema.type_name
        )));
    }

    for field in schema.fields {
        let field_value = match object.get(field.name) {
            None | Some(Value::Null) => continue,
            Some(v) => v,
        };
        let field_path = join_path(path, field.name);
        match field.kind {
            FieldKind::Scalar => insert_leaf(out, field_path, serde_json::to_string(field_value)?)?,
            FieldKind::Nested(nested) => flatten_struct(&field_path, nested, field_value, out)?,
            FieldKind::Collection(element) => {
                flatten_collection(&field_path, element, field_value, out)?
            }
        }
    }
    Ok(())
}

fn flatten_collection(
    path: &str,
    element: &Schema,
    value: &Value,
    out: &mut KeyValues,
) -> CatalogResult<()> {
    let items = value.as_array().ok_or_else(|| {
        CatalogError::validation(format!("{} must be a list of {}", path, element.type_name))
    })?;

    let mut seen = HashSet::new();
    for (ordinal, item) in items.iter().enumerate() {
        let key = element_key(element, item, ordinal)?;
        if !seen.insert(key.clone()) {
            return Err(CatalogError::validation(format!(
                "duplicate {} with Id {} in {}",
                element.type_name, key, path
            )));
        }
        flatten_struct(&join_path(path, &key), element, item, out)?;
    }
    Ok(())
}

/// Key segment of a collection element: its `Id`, or its ordinal for
/// element types without one.
pub fn element_key(element: &Schema, item: &Value, ordinal: usize) -> CatalogResult<String> {
    if !element.is_keyed() {
        return Ok(ordinal.to_string());
    }
    match item.get(ID_FIELD).and_then(Value::as_str) {
        Some(id) if !id.is_empty() => {
            check_segment(element, id)?;
            Ok(id.to_string())
        }
        _ => Err(CatalogError::validation(format!(
            "{} at position {} has no Id",
            element.type_name, ordinal
        ))),
    }
}

fn check_segment(schema: &Schema, id: &str) -> CatalogResult<()> {
    if id.is_empty() || id.contains('/') {
        return Err(CatalogError::validation(format!(
            "{} Id '{}' cannot be used as a key",
            schema.type_name, id
        )));
    }
    Ok(())
}

fn insert_leaf(out: &mut KeyValues, key: String, value: String) -> CatalogResult<()> {
    if out.contains_key(&key) {
        return Err(CatalogError::internal(format!("key {} produced twice", key)));
    }
    out.insert(key, value);
    Ok(())
}

/// Give every collection element lacking an `Id` a fresh one, recursing
/// through nested structs and elements. Elements whose `Id` references
/// another entity are left alone.
pub fn fill_missing_ids(schema: &Schema, value: &mut Value) {
    let Some(object) = value.as_object_mut() else {
        return;
    };
    for field in schema.fields {
        match (field.kind, object.get_mut(field.name)) {
            (FieldKind::Nested(nested), Some(v)) => fill_missing_ids(nested, v),
            (FieldKind::Collection(element), Some(Value::Array(items))) => {
                for item in items.iter_mut() {
                    if element.generates_ids() {
                        if let Some(item_object) = item.as_object_mut() {
                            let missing = item_object
                                .get(ID_FIELD)
                                .and_then(Value::as_str)
                                .map_or(true, str::is_empty);
                            if missing {
                                item_object.insert(ID_FIELD.to_string(), Value::String(generate_id()));
                            }
                        }
                    }
                    fill_missing_ids(element, item);
                }
            }
            _ => {}
        }
    }
}

/// Sort keyed collection elements into the order they are read back in.
///
/// Keyed collections are sets: the store keeps no element order, and a read
/// returns elements ordered by key. Applying this before writing makes the
/// value handed back to a caller equal to any later read.
pub fn canonical_order(schema: &Schema, value: &mut Value) {
    let Some(object) = value.as_object_mut() else {
        return;
    };
    for field in schema.fields {
        match (field.kind, object.get_mut(field.name)) {
            (FieldKind::Nested(nested), Some(v)) => canonical_order(nested, v),
            (FieldKind::Collection(element), Some(Value::Array(items))) => {
                if element.is_keyed() {
                    items.sort_by(|a, b| {
                        compare_segments(
                            a.get(ID_FIELD).and_then(Value::as_str).unwrap_or_default(),
                            b.get(ID_FIELD).and_then(Value::as_str).unwrap_or_default(),
                        )
                    });
                }
                for item in items.iter_mut() {
                    canonical_order(element, item);
                }
            }
            _ => {}
        }
    }
}

/// Rebuild the JSON object for `schema` from a directory node. Keys not
/// described by the schema are skipped; collections without any stored
/// element come back as empty lists.
pub fn unflatten_struct(node: &KvNode, schema: &Schema) -> CatalogResult<Value> {
    let mut object = Map::new();

    for child in &node.nodes {
        let name = child.name();
        let Some(field) = schema.field(name) else {
            log::debug!("skipping {} which is not a field of {}", child.key, schema.type_name);
            continue;
        };
        let value = match (field.kind, child.dir) {
            (FieldKind::Scalar, false) => parse_leaf(child)?,
            (FieldKind::Nested(nested), true) => unflatten_struct(child, nested)?,
            (FieldKind::Collection(element), true) => unflatten_collection(child, element)?,
            (_, dir) => {
                return Err(CatalogError::internal(format!(
                    "unexpected {} at {} for {}.{}",
                    if dir { "directory" } else { "leaf" },
                    child.key,
                    schema.type_name,
                    field.name
                )))
            }
        };
        object.insert(field.name.to_string(), value);
    }

    for field in schema.fields {
        if matches!(field.kind, FieldKind::Collection(_)) && !object.contains_key(field.name) {
            object.insert(field.name.to_string(), Value::Array(Vec::new()));
        }
    }

    if schema.is_keyed() && !object.contains_key(ID_FIELD) {
        object.insert(ID_FIELD.to_string(), Value::String(node.name().to_string()));
    }

    Ok(Value::Object(object))
}

fn unflatten_collection(node: &KvNode, element: &Schema) -> CatalogResult<Value> {
    let items = node
        .nodes
        .iter()
        .sorted_by(|a, b| compare_segments(a.name(), b.name()))
        .map(|child| {
            if !child.dir {
                return Err(CatalogError::internal(format!(
                    "{} element at {} is not a directory",
                    element.type_name, child.key
                )));
            }
            unflatten_struct(child, element)
        })
        .collect::<CatalogResult<Vec<_>>>()?;
    Ok(Value::Array(items))
}

/// Ordinal keys sort numerically, everything else lexicographically.
fn compare_segments(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

fn parse_leaf(node: &KvNode) -> CatalogResult<Value> {
    let raw = node.value.as_deref().unwrap_or_default();
    serde_json::from_str(raw).map_err(|e| {
        CatalogError::internal(format!("malformed value at {}: {}", node.key, e))
    })
}
