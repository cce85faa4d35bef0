//! Workflow executor implementation

mod config;
mod engine;
mod runner;

pub use config::{ExecutorConfig, HumanTimeoutAction};
pub use engine::WorkflowEngine;
pub use runner::{bindings, Collaborators, StepRunner};
