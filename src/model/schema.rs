//! Declarative field layout of every catalog entity.
//!
//! The mapper and the patch translator never introspect values to learn
//! their shape; they walk these descriptors instead. Field names are the
//! serialized (PascalCase) names and double as key path segments.

use std::collections::HashSet;

use crate::error::{CatalogError, CatalogResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Stored as one leaf holding the JSON text of the value.
    Scalar,
    /// Stored as a sub-directory laid out by the nested schema.
    Nested(&'static Schema),
    /// Stored as one sub-directory per element, keyed by the element `Id`
    /// or by its ordinal when the element schema has no `Id`.
    Collection(&'static Schema),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl Field {
    pub const fn scalar(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Scalar,
        }
    }

    pub const fn nested(name: &'static str, schema: &'static Schema) -> Self {
        Self {
            name,
            kind: FieldKind::Nested(schema),
        }
    }

    pub const fn collection(name: &'static str, schema: &'static Schema) -> Self {
        Self {
            name,
            kind: FieldKind::Collection(schema),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Schema {
    pub type_name: &'static str,
    /// Element `Id`s name other entities instead of identifying the element
    /// itself, so the catalog never generates them.
    pub references: bool,
    pub fields: &'static [Field],
}

pub const ID_FIELD: &str = "Id";
pub const NAME_FIELD: &str = "Name";
pub const STATE_FIELD: &str = "State";
pub const METADATA_FIELD: &str = "Metadata";
pub const AUDIT_TRAIL_FIELD: &str = "AuditTrail";

impl Schema {
    pub fn field(&self, name: &str) -> Option<&'static Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Whether elements of this schema are keyed by their own `Id`.
    pub fn is_keyed(&self) -> bool {
        matches!(self.field(ID_FIELD), Some(f) if f.kind == FieldKind::Scalar)
    }

    /// Whether a missing element `Id` may be filled with a fresh one.
    pub fn generates_ids(&self) -> bool {
        self.is_keyed() && !self.references
    }
}

pub static METADATA_SCHEMA: Schema = Schema {
    type_name: "Metadata",
    references: false,
    fields: &[
        Field::scalar(ID_FIELD),
        Field::scalar("Key"),
        Field::scalar("Value"),
    ],
};

pub static AUDIT_TRAIL_SCHEMA: Schema = Schema {
    type_name: "AuditTrail",
    references: false,
    fields: &[
        Field::scalar("CreatedOn"),
        Field::scalar("CreatedBy"),
        Field::scalar("LastUpdatedOn"),
        Field::scalar("LastUpdateBy"),
    ],
};

pub static SERVICE_PLAN_SCHEMA: Schema = Schema {
    type_name: "ServicePlan",
    references: false,
    fields: &[
        Field::scalar(ID_FIELD),
        Field::scalar(NAME_FIELD),
        Field::scalar("Description"),
        Field::scalar("Cost"),
    ],
};

pub static INSTANCE_BINDINGS_SCHEMA: Schema = Schema {
    type_name: "InstanceBindings",
    references: true,
    fields: &[
        Field::scalar(ID_FIELD),
        Field::collection("Data", &METADATA_SCHEMA),
    ],
};

pub static APPLICATION_SCHEMA: Schema = Schema {
    type_name: "Application",
    references: false,
    fields: &[
        Field::scalar(ID_FIELD),
        Field::scalar(NAME_FIELD),
        Field::scalar("Description"),
        Field::scalar("ImageId"),
        Field::scalar("Replication"),
        Field::scalar("TemplateId"),
        Field::collection(METADATA_FIELD, &METADATA_SCHEMA),
        Field::nested(AUDIT_TRAIL_FIELD, &AUDIT_TRAIL_SCHEMA),
    ],
};

pub static SERVICE_SCHEMA: Schema = Schema {
    type_name: "Service",
    references: false,
    fields: &[
        Field::scalar(ID_FIELD),
        Field::scalar(NAME_FIELD),
        Field::scalar("Description"),
        Field::scalar("Bindable"),
        Field::scalar("TemplateId"),
        Field::scalar(STATE_FIELD),
        Field::collection("Plans", &SERVICE_PLAN_SCHEMA),
        Field::scalar("Tags"),
        Field::collection(METADATA_FIELD, &METADATA_SCHEMA),
        Field::nested(AUDIT_TRAIL_FIELD, &AUDIT_TRAIL_SCHEMA),
    ],
};

pub static INSTANCE_SCHEMA: Schema = Schema {
    type_name: "Instance",
    references: false,
    fields: &[
        Field::scalar(ID_FIELD),
        Field::scalar(NAME_FIELD),
        Field::scalar("Type"),
        Field::scalar("ClassId"),
        Field::collection("Bindings", &INSTANCE_BINDINGS_SCHEMA),
        Field::collection(METADATA_FIELD, &METADATA_SCHEMA),
        Field::scalar(STATE_FIELD),
        Field::nested(AUDIT_TRAIL_FIELD, &AUDIT_TRAIL_SCHEMA),
    ],
};

pub static IMAGE_SCHEMA: Schema = Schema {
    type_name: "Image",
    references: false,
    fields: &[
        Field::scalar(ID_FIELD),
        Field::scalar("Type"),
        Field::scalar("BlobType"),
        Field::scalar(STATE_FIELD),
        Field::nested(AUDIT_TRAIL_FIELD, &AUDIT_TRAIL_SCHEMA),
    ],
};

pub static TEMPLATE_SCHEMA: Schema = Schema {
    type_name: "Template",
    references: false,
    fields: &[
        Field::scalar(ID_FIELD),
        Field::scalar(STATE_FIELD),
        Field::nested(AUDIT_TRAIL_FIELD, &AUDIT_TRAIL_SCHEMA),
    ],
};

/// Every top-level entity schema served by the catalog.
pub static REGISTRY: &[&Schema] = &[
    &APPLICATION_SCHEMA,
    &SERVICE_SCHEMA,
    &INSTANCE_SCHEMA,
    &IMAGE_SCHEMA,
    &TEMPLATE_SCHEMA,
];

pub fn lookup(type_name: &str) -> Option<&'static Schema> {
    REGISTRY.iter().copied().find(|s| s.type_name == type_name)
}

/// Checked once at startup: every entity is keyed by `Id` and every field
/// name is unique and usable as a key segment.
pub fn validate_registry() -> CatalogResult<()> {
    for schema in REGISTRY {
        if !schema.generates_ids() {
            return Err(CatalogError::internal(format!(
                "entity schema {} needs a scalar Id field of its own",
                schema.type_name
            )));
        }
        validate_schema(schema)?;
    }
    Ok(())
}

fn validate_schema(schema: &Schema) -> CatalogResult<()> {
    let mut seen = HashSet::new();
    for field in schema.fields {
        if field.name.is_empty() || field.name.contains('/') {
            return Err(CatalogError::internal(format!(
                "{} declares field '{}' which cannot be used as a key segment",
                schema.type_name, field.name
            )));
        }
        if !seen.insert(field.name) {
            return Err(CatalogError::internal(format!(
                "{} declares field {} twice",
                schema.type_name, field.name
            )));
        }
        match field.kind {
            FieldKind::Scalar => {}
            FieldKind::Nested(nested) | FieldKind::Collection(nested) => validate_schema(nested)?,
        }
    }
    Ok(())
}
