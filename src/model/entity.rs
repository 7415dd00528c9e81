use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::schema::Schema;
use crate::model::{AuditTrail, Id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Application,
    Service,
    ServicePlan,
    Instance,
    Image,
    Template,
}

impl EntityKind {
    /// Key segment of the collection holding entities of this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Application => "Applications",
            EntityKind::Service => "Services",
            EntityKind::ServicePlan => "Plans",
            EntityKind::Instance => "Instances",
            EntityKind::Image => "Images",
            EntityKind::Template => "Templates",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Application => "Application",
            EntityKind::Service => "Service",
            EntityKind::ServicePlan => "ServicePlan",
            EntityKind::Instance => "Instance",
            EntityKind::Image => "Image",
            EntityKind::Template => "Template",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A top-level catalog entity stored as one subtree per id.
///
/// The associated schema drives both directions of the key-value mapping, so
/// the concrete type is always chosen at the call site.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn schema() -> &'static Schema;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: Id);

    /// Entities without a unique name return `None`.
    fn name(&self) -> Option<&str> {
        None
    }

    fn audit_trail_mut(&mut self) -> &mut AuditTrail;
}
