//! Workflow domain module
//!
//! A workflow is an ordered list of typed steps. Runs start from a trigger
//! output and append one output per completed step; steps read earlier
//! outputs through `$.`-rooted queries such as `$.outputs[1].summary` or
//! `$.initial_step`.

mod context;
mod entity;
mod error;
mod event;
mod executor;
pub mod query;
mod run;
mod status;
mod step_types;
pub mod validation;

pub use context::ExecutionContext;
pub use entity::{TriggerType, WorkflowId, WorkflowStep, WorkflowTemplate};
pub use error::WorkflowError;
pub use event::{EventBus, RunEvent, RunEventKind, DEFAULT_EVENT_CAPACITY};
pub use executor::{RunHandle, WorkflowExecutor};
pub use query::{QueryError, QueryResult};
pub use run::{Decision, HumanDecision, PendingHuman, RunError, RunId, RunStatus, WorkflowRun};
pub use status::{project, project_run, StatusProjection, StepStatus};
pub use step_types::{
    CustomPromptStep, FunctionLanguage, FunctionStep, HumanStep, StepKind, StructuredOutput,
    TemplateStep, ToolCallStep, TransformStep, STEP_TYPES,
};
pub use validation::{parse_workflow, validate, ValidationOutcome};
