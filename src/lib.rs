//! LiteChat workflow engine
//!
//! Runs linear workflows that chain prompt templates, model calls, tool
//! invocations, sandboxed functions, data transforms and human approval
//! gates. Definitions and run records persist through a pluggable storage
//! backend; the engine is exposed over an HTTP/JSON API and a CLI.

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;

use tracing::{info, warn};

use api::state::AppState;
use domain::{PromptTemplate, WorkflowRun, WorkflowTemplate};
use infrastructure::llm::LlmProviderFactory;
use infrastructure::sandbox::SandboxRouter;
use infrastructure::services::{PromptService, WorkflowService};
use infrastructure::storage::StorageFactory;
use infrastructure::tool::ToolRegistry;
use infrastructure::workflow::{Collaborators, WorkflowEngine};

/// Wire storage, collaborators, the engine and services from configuration
pub async fn create_app_state(config: &AppConfig) -> anyhow::Result<AppState> {
    let storage = config.storage.storage_config()?;
    info!(backend = ?storage.storage_type(), "Storage backend selected");

    let workflows = StorageFactory::create::<WorkflowTemplate>(&storage, "workflows").await?;
    let prompts = StorageFactory::create::<PromptTemplate>(&storage, "prompts").await?;
    let runs = StorageFactory::create::<WorkflowRun>(&storage, "workflow_runs").await?;

    if config.sandbox.process_enabled {
        warn!("Python and JavaScript function steps run as unsandboxed local subprocesses");
    }

    let collaborators = Collaborators {
        llm: Arc::new(LlmProviderFactory::build_router(&config.providers)?),
        tools: Arc::new(ToolRegistry::with_builtins()?),
        sandbox: Arc::new(SandboxRouter::new(config.sandbox.clone())),
        prompts: prompts.clone(),
    };

    let engine = WorkflowEngine::new(collaborators, runs, config.executor.clone());
    info!(
        step_timeout_ms = config.executor.step_timeout_ms,
        single_run_per_workflow = config.executor.single_run_per_workflow,
        "Workflow engine ready"
    );

    Ok(AppState::new(
        Arc::new(WorkflowService::new(workflows, Arc::new(engine))),
        Arc::new(PromptService::new(prompts)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_default_config_builds_in_memory_state() {
        let state = create_app_state(&AppConfig::default()).await.unwrap();

        assert!(state.workflow_service.load_workflows().await.unwrap().is_empty());
        assert!(state.prompt_service.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_backend_persists_workflows() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.backend = "sqlite".to_string();
        config.storage.url = Some(format!("sqlite://{}", dir.path().join("wf.db").display()));

        let document = json!({
            "id": "wf-1",
            "name": "Shape",
            "description": "",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z",
            "steps": [
                {"id": "t1", "name": "Shape", "type": "transform", "transformMappings": {"text": "$.initial_step"}}
            ]
        });

        {
            let state = create_app_state(&config).await.unwrap();
            state.workflow_service.import(&document).await.unwrap();
        }

        let reopened = create_app_state(&config).await.unwrap();
        let workflows = reopened.workflow_service.load_workflows().await.unwrap();
        assert_eq!(workflows.len(), 1);
        assert_eq!(workflows[0].id().as_str(), "wf-1");
    }

    #[tokio::test]
    async fn test_sqlite_without_url_is_rejected() {
        let mut config = AppConfig::default();
        config.storage.backend = "sqlite".to_string();

        assert!(create_app_state(&config).await.is_err());
    }
}
