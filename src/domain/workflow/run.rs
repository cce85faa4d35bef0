//! Run records and human decisions

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::entity::{WorkflowId, WorkflowTemplate};
use super::error::WorkflowError;
use crate::domain::storage::{StorageEntity, StorageKey};

/// Run identifier (UUID v4, stored as text)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(id: &str) -> Result<Self, WorkflowError> {
        Uuid::parse_str(id)
            .map(|uuid| Self(uuid.to_string()))
            .map_err(|_| WorkflowError::validation(format!("Invalid run ID '{}'", id)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RunId {
    type Error = WorkflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StorageKey for RunId {
    fn as_str(&self) -> &str {
        &self.0
    }
}

/// Run state machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Pending,
    Running,
    PausedForHuman,
    Success,
    Error,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::PausedForHuman => "paused-for-human",
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Failure detail recorded on a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunError {
    pub kind: String,
    pub message: String,
}

impl From<&WorkflowError> for RunError {
    fn from(err: &WorkflowError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// What a paused run is waiting on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingHuman {
    pub step_id: String,
    pub instructions: String,
}

/// Snapshot of one workflow run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    pub status: RunStatus,
    /// Index of the step being executed, if any
    pub current_step: Option<usize>,
    /// Trigger output followed by one entry per completed step
    pub outputs: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_human: Option<PendingHuman>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Definition as it was when the run started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowTemplate>,
}

impl WorkflowRun {
    pub fn new(run_id: RunId, workflow_id: WorkflowId) -> Self {
        Self {
            run_id,
            workflow_id,
            status: RunStatus::Pending,
            current_step: None,
            outputs: Vec::new(),
            failed_step_id: None,
            error: None,
            pending_human: None,
            started_at: Utc::now(),
            finished_at: None,
            workflow: None,
        }
    }

    pub fn with_workflow(mut self, workflow: WorkflowTemplate) -> Self {
        self.workflow = Some(workflow);
        self
    }

    /// Outputs produced by steps, without the trigger output
    pub fn step_outputs(&self) -> &[Value] {
        self.outputs.get(1..).unwrap_or(&[])
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl StorageEntity for WorkflowRun {
    type Key = RunId;

    fn key(&self) -> &Self::Key {
        &self.run_id
    }
}

/// Reviewer verdict for a paused step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

/// External event resuming or terminating a paused run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HumanDecision {
    pub run_id: RunId,
    pub step_id: String,
    pub decision: Decision,
    /// Replacement output for the paused step, on approval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl HumanDecision {
    pub fn approve(run_id: RunId, step_id: impl Into<String>) -> Self {
        Self {
            run_id,
            step_id: step_id.into(),
            decision: Decision::Approve,
            data: None,
        }
    }

    pub fn reject(run_id: RunId, step_id: impl Into<String>) -> Self {
        Self {
            decision: Decision::Reject,
            ..Self::approve(run_id, step_id)
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}
