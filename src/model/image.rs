use serde::{Deserialize, Serialize};

use crate::model::schema::{Schema, IMAGE_SCHEMA, TEMPLATE_SCHEMA};
use crate::model::{AuditTrail, Entity, EntityKind, Id, ImageState, TemplateState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageType {
    #[default]
    Java,
    Go,
    NodeJs,
    Python,
    Docker,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlobType {
    #[default]
    TarGz,
    Jar,
    Exec,
}

/// Container image built from an uploaded application artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Image {
    pub id: Id,
    #[serde(rename = "Type")]
    pub image_type: ImageType,
    pub blob_type: BlobType,
    pub state: ImageState,
    pub audit_trail: AuditTrail,
}

/// Deployment template describing how instances are laid out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Template {
    pub id: Id,
    pub state: TemplateState,
    pub audit_trail: AuditTrail,
}

impl Entity for Image {
    const KIND: EntityKind = EntityKind::Image;

    fn schema() -> &'static Schema {
        &IMAGE_SCHEMA
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: Id) {
        self.id = id;
    }

    fn audit_trail_mut(&mut self) -> &mut AuditTrail {
        &mut self.audit_trail
    }
}

impl Entity for Template {
    const KIND: EntityKind = EntityKind::Template;

    fn schema() -> &'static Schema {
        &TEMPLATE_SCHEMA
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: Id) {
        self.id = id;
    }

    fn audit_trail_mut(&mut self) -> &mut AuditTrail {
        &mut self.audit_trail
    }
}
