use thiserror::Error;

use crate::domain::workflow::WorkflowError;

/// Errors raised by tool invocations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {name}")]
    NotFound { name: String },

    #[error("Tool already registered: {name}")]
    AlreadyRegistered { name: String },

    #[error("Invalid arguments for tool '{name}': {message}")]
    InvalidArguments { name: String, message: String },

    #[error("Tool '{name}' failed: {message}")]
    Execution { name: String, message: String },
}

impl ToolError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn already_registered(name: impl Into<String>) -> Self {
        Self::AlreadyRegistered { name: name.into() }
    }

    pub fn invalid_arguments(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn execution(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn tool_name(&self) -> &str {
        match self {
            Self::NotFound { name }
            | Self::AlreadyRegistered { name }
            | Self::InvalidArguments { name, .. }
            | Self::Execution { name, .. } => name,
        }
    }
}

impl From<ToolError> for WorkflowError {
    fn from(err: ToolError) -> Self {
        WorkflowError::tool(err.tool_name().to_string(), err.to_string())
    }
}
