//! Application state shared by all handlers

use std::sync::Arc;

use crate::infrastructure::services::{PromptService, WorkflowService};

#[derive(Clone, Debug)]
pub struct AppState {
    pub workflow_service: Arc<WorkflowService>,
    pub prompt_service: Arc<PromptService>,
}

impl AppState {
    pub fn new(workflow_service: Arc<WorkflowService>, prompt_service: Arc<PromptService>) -> Self {
        Self {
            workflow_service,
            prompt_service,
        }
    }
}
