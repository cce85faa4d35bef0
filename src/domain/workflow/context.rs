//! Per-run execution context
//!
//! Queries see the context as
//! `{ "workflow": ..., "initial_step": ..., "outputs": [...] }`, where
//! `outputs[0]` is the trigger output and every later entry belongs to a
//! completed step, in execution order.

use std::sync::Arc;

use serde_json::{json, Value};

use super::entity::WorkflowTemplate;

/// Append-only record of a run's inputs and step outputs
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    workflow: Arc<WorkflowTemplate>,
    outputs: Vec<Value>,
}

impl ExecutionContext {
    /// Seed a context with the trigger output
    pub fn new(workflow: Arc<WorkflowTemplate>, initial: Value) -> Self {
        Self {
            workflow,
            outputs: vec![initial],
        }
    }

    /// Rebuild a context from a run record's outputs
    pub fn from_outputs(workflow: Arc<WorkflowTemplate>, mut outputs: Vec<Value>) -> Self {
        if outputs.is_empty() {
            outputs.push(Value::Null);
        }
        Self { workflow, outputs }
    }

    pub fn workflow(&self) -> &WorkflowTemplate {
        &self.workflow
    }

    pub fn initial_step(&self) -> &Value {
        &self.outputs[0]
    }

    pub fn outputs(&self) -> &[Value] {
        &self.outputs
    }

    /// Output of the most recently completed step (or the trigger)
    pub fn last_output(&self) -> &Value {
        self.outputs.last().unwrap_or(&self.outputs[0])
    }

    /// Record a completed step's output. Only the executor appends.
    pub(crate) fn append_output(&mut self, output: Value) {
        self.outputs.push(output);
    }

    /// JSON view used by the query resolver and sandboxes
    pub fn to_json(&self) -> Value {
        json!({
            "workflow": serde_json::to_value(self.workflow.as_ref()).unwrap_or(Value::Null),
            "initial_step": self.initial_step(),
            "outputs": self.outputs,
        })
    }
}
