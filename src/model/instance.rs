use serde::{Deserialize, Serialize};

use crate::model::schema::{Schema, INSTANCE_SCHEMA};
use crate::model::{
    find_metadata, AuditTrail, Entity, EntityKind, Id, InstanceState, Metadata, PLAN_ID_METADATA,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceType {
    #[default]
    Application,
    Service,
    ServiceBroker,
}

/// A running (or requested) deployment of an Application or a Service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Instance {
    pub id: Id,
    pub name: String,
    #[serde(rename = "Type")]
    pub instance_type: InstanceType,
    /// Id of the Application or Service this instance was created from.
    pub class_id: Id,
    pub bindings: Vec<InstanceBindings>,
    pub metadata: Vec<Metadata>,
    pub state: InstanceState,
    pub audit_trail: AuditTrail,
}

/// A reference to another instance, with binding-specific data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InstanceBindings {
    /// Id of the bound instance.
    pub id: Id,
    pub data: Vec<Metadata>,
}

impl Instance {
    pub fn plan_id(&self) -> Option<&str> {
        find_metadata(&self.metadata, PLAN_ID_METADATA)
    }

    pub fn is_bound_to(&self, instance_id: &str) -> bool {
        self.bindings.iter().any(|b| b.id == instance_id)
    }
}

impl Entity for Instance {
    const KIND: EntityKind = EntityKind::Instance;

    fn schema() -> &'static Schema {
        &INSTANCE_SCHEMA
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
