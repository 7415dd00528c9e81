use serde::{Deserialize, Serialize};

use crate::model::schema::{Schema, SERVICE_SCHEMA};
use crate::model::{AuditTrail, Entity, EntityKind, Id, Metadata, ServiceState};

/// An offering from the marketplace, provisioned through one of its plans.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Service {
    pub id: Id,
    pub name: String,
    pub description: String,
    pub bindable: bool,
    pub template_id: Id,
    pub state: ServiceState,
    pub plans: Vec<ServicePlan>,
    pub tags: Vec<String>,
    pub metadata: Vec<Metadata>,
    pub audit_trail: AuditTrail,
}

/// Plans live inside their service's subtree under `Plans/<planId>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServicePlan {
    pub id: Id,
    pub name: String,
    pub description: String,
    pub cost: String,
}

impl Service {
    pub fn plan(&self, plan_id: &str) -> Option<&ServicePlan> {
        self.plans.iter().find(|p| p.id == plan_id)
    }
}

impl Entity for Service {
    const KIND: EntityKind = EntityKind::Service;

    fn schema() -> &'static Schema {
        &SERVICE_SCHEMA
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
