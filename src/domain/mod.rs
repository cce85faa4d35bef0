//! Domain layer - Core business logic and entities

pub mod error;
pub mod identifier;
pub mod llm;
pub mod prompt;
pub mod sandbox;
pub mod storage;
pub mod tool;
pub mod workflow;

pub use error::DomainError;
pub use llm::{
    FinishReason, LlmProvider, LlmRequest, LlmRequestBuilder, LlmResponse, LlmResponseFormat,
    Message, MessageRole, Usage,
};
pub use prompt::{
    CompiledPrompt, PromptId, PromptKind, PromptTemplate, PromptVariable, TemplateError,
    VariableType,
};
pub use sandbox::{FunctionSandbox, SandboxError};
pub use storage::{Storage, StorageEntity, StorageKey};
pub use tool::{ToolDescriptor, ToolError, ToolInvoker};
pub use workflow::{
    ExecutionContext, HumanDecision, RunEvent, RunEventKind, RunHandle, RunId, RunStatus, StepKind,
    StepStatus, WorkflowError, WorkflowExecutor, WorkflowId, WorkflowRun, WorkflowStep,
    WorkflowTemplate,
};
