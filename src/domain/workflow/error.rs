//! Workflow error types

use thiserror::Error;

use crate::domain::prompt::TemplateError;
use crate::domain::DomainError;

/// Errors raised while validating or running a workflow
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorkflowError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Invalid query: {message}")]
    QuerySyntax { message: String },

    #[error("Query resolution failed: {message}")]
    QueryResolution { message: String },

    #[error("Template error: {message}")]
    Template { message: String },

    #[error("Model '{model}' failed: {message}")]
    ModelInvocation { model: String, message: String },

    #[error("Tool '{tool}' failed: {message}")]
    ToolInvocation { tool: String, message: String },

    #[error("Function execution failed: {message}")]
    FunctionExecution { message: String },

    #[error("Step '{step_id}' was rejected by the reviewer")]
    HumanRejected { step_id: String },

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Step '{step_id}' timed out after {timeout_ms}ms")]
    Timeout { step_id: String, timeout_ms: u64 },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },
}

impl WorkflowError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn query_syntax(message: impl Into<String>) -> Self {
        Self::QuerySyntax {
            message: message.into(),
        }
    }

    pub fn query_resolution(message: impl Into<String>) -> Self {
        Self::QueryResolution {
            message: message.into(),
        }
    }

    pub fn model(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModelInvocation {
            model: model.into(),
            message: message.into(),
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolInvocation {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn function(message: impl Into<String>) -> Self {
        Self::FunctionExecution {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Stable machine-readable kind, recorded on failed runs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::QuerySyntax { .. } => "query_syntax",
            Self::QueryResolution { .. } => "query_resolution",
            Self::Template { .. } => "template",
            Self::ModelInvocation { .. } => "model_invocation",
            Self::ToolInvocation { .. } => "tool_invocation",
            Self::FunctionExecution { .. } => "function_execution",
            Self::HumanRejected { .. } => "human_rejected",
            Self::Cancelled => "cancelled",
            Self::Timeout { .. } => "timeout",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::InvalidState { .. } => "invalid_state",
            Self::Persistence { .. } => "persistence",
        }
    }
}

impl From<TemplateError> for WorkflowError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::MissingVariable { .. } => Self::validation(err.to_string()),
            TemplateError::TypeMismatch { .. } => Self::Template {
                message: err.to_string(),
            },
        }
    }
}

impl From<DomainError> for WorkflowError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound { message } => Self::not_found(message),
            DomainError::Validation { message } | DomainError::InvalidId { message } => {
                Self::validation(message)
            }
            DomainError::Conflict { message } => Self::conflict(message),
            DomainError::InvalidState { message } => Self::invalid_state(message),
            other => Self::persistence(other.to_string()),
        }
    }
}

impl From<WorkflowError> for DomainError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Validation { message }
            | WorkflowError::QuerySyntax { message }
            | WorkflowError::Template { message } => DomainError::validation(message),
            WorkflowError::NotFound { message } => DomainError::not_found(message),
            WorkflowError::Conflict { message } => DomainError::conflict(message),
            WorkflowError::InvalidState { message } => DomainError::invalid_state(message),
            WorkflowError::Persistence { message } => DomainError::storage(message),
            WorkflowError::ModelInvocation { model, message } => {
                DomainError::provider(model, message)
            }
            other => DomainError::internal(other.to_string()),
        }
    }
}
