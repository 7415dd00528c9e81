use serde::{Deserialize, Serialize};

use crate::model::schema::{Schema, APPLICATION_SCHEMA};
use crate::model::{AuditTrail, Entity, EntityKind, Id, Metadata};

/// A user application built from an image and deployed from a template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Application {
    pub id: Id,
    pub name: String,
    pub description: String,
    pub image_id: Id,
    pub replication: u32,
    pub template_id: Id,
    pub metadata: Vec<Metadata>,
    pub audit_trail: AuditTrail,
}

impl Entity for Application {
    const KIND: EntityKind = EntityKind::Application;

    fn schema() -> &'static Schema {
        &APPLICATION_SCHEMA
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: Id) {
        self.id = id;
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn audit_trail_mut(&mut self) -> &mut AuditTrail {
        &mut self.audit_trail
    }
}
