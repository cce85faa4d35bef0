use async_trait::async_trait;
use serde_json::Value;

use super::SandboxError;
use crate::domain::workflow::FunctionLanguage;

#[cfg(test)]
use mockall::automock;

/// Runs function-step code against a read-only JSON scope.
///
/// The scope holds `workflow`, `initial_step`, `outputs` and the step's
/// declared function variables. Implementations get no other input and
/// return the function's result as JSON.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FunctionSandbox: Send + Sync {
    async fn execute(
        &self,
        language: FunctionLanguage,
        code: &str,
        scope: Value,
    ) -> Result<Value, SandboxError>;
}
