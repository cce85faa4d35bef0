//! Per-step display status derived from run events

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::entity::WorkflowStep;
use super::event::{RunEvent, RunEventKind};
use super::run::RunId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Success,
    Error,
}

/// Incremental projection; holds no state beyond what events imply
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusProjection {
    statuses: BTreeMap<String, StepStatus>,
}

impl StatusProjection {
    /// Start with every known step pending
    pub fn new(steps: &[WorkflowStep]) -> Self {
        Self {
            statuses: steps
                .iter()
                .map(|step| (step.id().to_string(), StepStatus::Pending))
                .collect(),
        }
    }

    pub fn apply(&mut self, event: &RunEvent) {
        let Some(step_id) = event.step_id.as_ref() else {
            return;
        };

        let status = match event.kind {
            RunEventKind::Started | RunEventKind::Paused | RunEventKind::Resumed => {
                StepStatus::Running
            }
            RunEventKind::Succeeded => StepStatus::Success,
            RunEventKind::Failed => StepStatus::Error,
        };

        self.statuses.insert(step_id.clone(), status);
    }

    pub fn get(&self, step_id: &str) -> StepStatus {
        self.statuses.get(step_id).copied().unwrap_or_default()
    }

    pub fn statuses(&self) -> &BTreeMap<String, StepStatus> {
        &self.statuses
    }

    pub fn into_map(self) -> BTreeMap<String, StepStatus> {
        self.statuses
    }
}

/// Fold one run's event history into per-step statuses. Events are applied
/// as given; use [`project_run`] for a stream shared by several runs.
pub fn project<'a>(
    steps: &[WorkflowStep],
    events: impl IntoIterator<Item = &'a RunEvent>,
) -> BTreeMap<String, StepStatus> {
    let mut projection = StatusProjection::new(steps);

    for event in events {
        projection.apply(event);
    }

    projection.into_map()
}

/// Like [`project`], keeping only the events of `run_id`
pub fn project_run<'a>(
    steps: &[WorkflowStep],
    run_id: &RunId,
    events: impl IntoIterator<Item = &'a RunEvent>,
) -> BTreeMap<String, StepStatus> {
    project(steps, events.into_iter().filter(|event| &event.run_id == run_id))
}
