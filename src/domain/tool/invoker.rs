//! Tool invoker trait

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::ToolError;

#[cfg(test)]
use mockall::automock;

/// Name and description of an invokable tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
}

/// Invokes named tools with JSON arguments
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Call a tool and return its JSON result
    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, ToolError>;

    /// Tools available to workflows
    fn tools(&self) -> Vec<ToolDescriptor>;
}
