use async_trait::async_trait;
use serde_json::Value;

use super::{ExpressionSandbox, ProcessSandbox, SandboxConfig};
use crate::domain::sandbox::{FunctionSandbox, SandboxError};
use crate::domain::workflow::FunctionLanguage;

/// Dispatches a function to the sandbox that runs its language
#[derive(Debug, Clone)]
pub struct SandboxRouter {
    expression: ExpressionSandbox,
    process: ProcessSandbox,
}

impl SandboxRouter {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            expression: ExpressionSandbox::new(),
            process: ProcessSandbox::new(config),
        }
    }

    pub fn supports(&self, language: FunctionLanguage) -> bool {
        match language {
            FunctionLanguage::Jexl => true,
            FunctionLanguage::Python | FunctionLanguage::Javascript => {
                self.process.config().process_enabled
            }
        }
    }
}

impl Default for SandboxRouter {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

#[async_trait]
impl FunctionSandbox for SandboxRouter {
    async fn execute(
        &self,
        language: FunctionLanguage,
        code: &str,
        scope: Value,
    ) -> Result<Value, SandboxError> {
        match language {
            FunctionLanguage::Jexl => self.expression.execute(language, code, scope).await,
            FunctionLanguage::Python | FunctionLanguage::Javascript => {
                self.process.execute(language, code, scope).await
            }
        }
    }
}
