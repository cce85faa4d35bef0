//! Workflow domain entity

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::WorkflowError;
use super::step_types::StepKind;
use super::validation;
use crate::domain::identifier::validate_identifier;
use crate::domain::storage::{StorageEntity, StorageKey};

/// Validated workflow identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Create a new validated workflow ID
    pub fn new(id: impl Into<String>) -> Result<Self, WorkflowError> {
        let id = id.into();
        validate_identifier("Workflow", &id).map_err(WorkflowError::validation)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WorkflowId {
    type Error = WorkflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkflowId> for String {
    fn from(id: WorkflowId) -> Self {
        id.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for WorkflowId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl StorageKey for WorkflowId {
    fn as_str(&self) -> &str {
        &self.0
    }
}

/// How a run obtains its initial input
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    /// Literal text from `triggerPrompt`
    #[default]
    Custom,
    /// Compile the prompt template named by `triggerRef`
    Template,
    /// Compile the agent task named by `triggerRef`
    Task,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::Template => "template",
            Self::Task => "task",
        }
    }
}

/// A step within a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    /// Unique id within the workflow
    id: String,

    name: String,

    #[serde(flatten)]
    kind: StepKind,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Switch the step type. The whole type-specific group is replaced.
    pub fn set_kind(&mut self, kind: StepKind) {
        self.kind = kind;
    }
}

/// A workflow definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTemplate {
    id: WorkflowId,

    name: String,

    #[serde(default)]
    description: String,

    #[serde(default)]
    trigger_type: TriggerType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    trigger_prompt: Option<String>,

    /// Template or agent task id, when not a custom trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trigger_ref: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    template_variables: BTreeMap<String, Value>,

    /// Execution order is the order of this list
    steps: Vec<WorkflowStep>,

    #[serde(default)]
    is_shortcut: bool,

    created_at: DateTime<Utc>,

    updated_at: DateTime<Utc>,
}

impl WorkflowTemplate {
    pub fn new(id: WorkflowId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            description: String::new(),
            trigger_type: TriggerType::Custom,
            trigger_prompt: None,
            trigger_ref: None,
            template_variables: BTreeMap::new(),
            steps: Vec::new(),
            is_shortcut: false,
            created_at: now,
            updated_at: now,
        }
    }

    // Builder methods

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_custom_trigger(mut self, prompt: impl Into<String>) -> Self {
        self.trigger_type = TriggerType::Custom;
        self.trigger_prompt = Some(prompt.into());
        self.trigger_ref = None;
        self
    }

    pub fn with_template_trigger(
        mut self,
        trigger_type: TriggerType,
        reference: impl Into<String>,
    ) -> Self {
        self.trigger_type = trigger_type;
        self.trigger_ref = Some(reference.into());
        self
    }

    pub fn with_template_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.template_variables.insert(name.into(), value);
        self
    }

    pub fn with_steps(mut self, steps: Vec<WorkflowStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_shortcut(mut self, is_shortcut: bool) -> Self {
        self.is_shortcut = is_shortcut;
        self
    }

    // Getters

    pub fn id(&self) -> &WorkflowId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn trigger_type(&self) -> TriggerType {
        self.trigger_type
    }

    pub fn trigger_prompt(&self) -> Option<&str> {
        self.trigger_prompt.as_deref()
    }

    pub fn trigger_ref(&self) -> Option<&str> {
        self.trigger_ref.as_deref()
    }

    pub fn template_variables(&self) -> &BTreeMap<String, Value> {
        &self.template_variables
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn is_shortcut(&self) -> bool {
        self.is_shortcut
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn get_step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id() == id)
    }

    pub fn get_step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id() == id)
    }

    // Setters (mutate and update timestamp)

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
        self.touch();
    }

    /// Move a step to a new position; positions are clamped to the list
    pub fn move_step(&mut self, from: usize, to: usize) -> Result<(), WorkflowError> {
        if from >= self.steps.len() {
            return Err(WorkflowError::validation(format!(
                "Step index {} out of range",
                from
            )));
        }

        let step = self.steps.remove(from);
        let to = to.min(self.steps.len());
        self.steps.insert(to, step);
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl StorageEntity for WorkflowTemplate {
    type Key = WorkflowId;

    fn key(&self) -> &Self::Key {
        &self.id
    }

    fn check_document(document: &Value) -> Result<(), String> {
        let outcome = validation::validate(document);
        match outcome.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
