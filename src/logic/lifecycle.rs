use itertools::Itertools;
use serde::Serialize;
use std::fmt::Display;
use std::str::FromStr;

use crate::error::{CatalogError, CatalogResult};
use crate::model::{EntityKind, ImageState, Instance, InstanceState, ServiceState, TemplateState};

pub fn instance_transitions(from: InstanceState) -> &'static [InstanceState] {
    use InstanceState::*;
    match from {
        Requested => &[Deploying],
        Deploying => &[Failure, Stopped, Starting],
        StartRequested => &[Starting],
        Starting => &[Failure, Running, StopRequested],
        Running => &[Failure, Reconfiguring, StopRequested],
        Reconfiguring => &[Starting, Stopping],
        StopRequested => &[Stopping],
        Stopping => &[Failure, Stopped],
        Stopped => &[StartRequested, Starting, Reconfiguring, DestroyRequested, Unavailable],
        Unavailable => &[Stopped, DestroyRequested],
        Failure => &[DestroyRequested],
        DestroyRequested => &[Destroying],
        Destroying => &[Failure],
    }
}

pub fn service_transitions(from: ServiceState) -> &'static [ServiceState] {
    use ServiceState::*;
    match from {
        Deploying => &[Ready, Offline],
        Ready | Offline => &[],
    }
}

pub fn image_transitions(from: ImageState) -> &'static [ImageState] {
    use ImageState::*;
    match from {
        Requested => &[Pending],
        Pending => &[Building],
        Building => &[Error, Ready],
        Ready => &[Removing],
        Error | Removing => &[],
    }
}

pub fn template_transitions(from: TemplateState) -> &'static [TemplateState] {
    use TemplateState::*;
    match from {
        InProgress => &[Ready, Unavailable],
        Ready | Unavailable => &[],
    }
}

/// Check that `kind` may move from `current` to `proposed`. Unknown states,
/// missing edges and self-transitions are validation errors.
pub fn validate(kind: EntityKind, current: &str, proposed: &str) -> CatalogResult<()> {
    match kind {
        EntityKind::Instance => check(kind, current, proposed, instance_transitions),
        EntityKind::Service => check(kind, current, proposed, service_transitions),
        EntityKind::Image => check(kind, current, proposed, image_transitions),
        EntityKind::Template => check(kind, current, proposed, template_transitions),
        EntityKind::Application | EntityKind::ServicePlan => Err(CatalogError::validation(
            format!("{} has no lifecycle state", kind),
        )),
    }
}

fn check<S>(
    kind: EntityKind,
    current: &str,
    proposed: &str,
    transitions: fn(S) -> &'static [S],
) -> CatalogResult<()>
where
    S: FromStr<Err = CatalogError> + Copy + PartialEq + Display,
{
    let from: S = current.parse()?;
    let to: S = proposed.parse()?;
    if transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(CatalogError::validation(format!(
            "{} state transition from {} to {} is not allowed",
            kind, from, to
        )))
    }
}

/// Entry action for a state that was just persisted.
pub fn on_transition(kind: EntityKind, id: &str, from: &str, to: &str) {
    log::info!("{} {} moved from {} to {}", kind, id, from, to);
}

/// Instances in these states have no work in progress.
pub fn is_stable(state: InstanceState) -> bool {
    matches!(
        state,
        InstanceState::Stopped | InstanceState::Running | InstanceState::Failure
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StabilityReport {
    pub stable: bool,
    pub message: String,
}

pub fn check_stability(instances: &[Instance]) -> StabilityReport {
    let unstable = instances
        .iter()
        .filter(|i| !is_stable(i.state))
        .map(|i| format!("instance {} is in state {}", i.id, i.state))
        .join("; ");

    if unstable.is_empty() {
        StabilityReport {
            stable: true,
            message: "all instances are stable".to_string(),
        }
    } else {
        StabilityReport {
            stable: false,
            message: unstable,
        }
    }
}
