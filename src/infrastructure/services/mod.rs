//! Infrastructure services

mod prompt_service;
mod workflow_service;

pub use prompt_service::{CreatePromptRequest, PromptService, UpdatePromptRequest};
pub use workflow_service::{RunView, WorkflowService};
