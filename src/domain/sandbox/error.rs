use thiserror::Error;

use crate::domain::workflow::WorkflowError;

/// Errors raised while running function code
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SandboxError {
    #[error("Unsupported function language: {language}")]
    UnsupportedLanguage { language: String },

    #[error("Function raised an error: {message}")]
    Raised { message: String },

    #[error("Function exceeded {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Function output exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },

    #[error("Sandbox unavailable: {message}")]
    Unavailable { message: String },
}

impl SandboxError {
    pub fn unsupported(language: impl Into<String>) -> Self {
        Self::UnsupportedLanguage {
            language: language.into(),
        }
    }

    pub fn raised(message: impl Into<String>) -> Self {
        Self::Raised {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

impl From<SandboxError> for WorkflowError {
    fn from(err: SandboxError) -> Self {
        WorkflowError::function(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_to_function_execution() {
        let err: WorkflowError = SandboxError::Timeout { timeout_ms: 50 }.into();
        assert_eq!(
            err,
            WorkflowError::FunctionExecution {
                message: "Function exceeded 50ms".to_string()
            }
        );
    }
}
