//! Workflow service - definition persistence and run control

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::domain::workflow::query::resolve;
use crate::domain::workflow::validation::{revalidate, validate};
use crate::domain::workflow::{project, QueryResult, RunEventKind, ValidationOutcome};
use crate::domain::{
    DomainError, ExecutionContext, HumanDecision, RunEvent, RunHandle, RunId, RunStatus, StepStatus,
    Storage, WorkflowExecutor, WorkflowId, WorkflowRun, WorkflowTemplate,
};

/// A run snapshot together with its per-step display status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    #[serde(flatten)]
    pub run: WorkflowRun,
    pub steps: BTreeMap<String, StepStatus>,
}

/// Workflow service for definitions and runs
pub struct WorkflowService {
    storage: Arc<dyn Storage<WorkflowTemplate>>,
    executor: Arc<dyn WorkflowExecutor>,
}

impl std::fmt::Debug for WorkflowService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowService").finish()
    }
}

impl WorkflowService {
    pub fn new(
        storage: Arc<dyn Storage<WorkflowTemplate>>,
        executor: Arc<dyn WorkflowExecutor>,
    ) -> Self {
        Self { storage, executor }
    }

    /// Get a workflow by ID. Stored definitions are re-validated on read.
    pub async fn get(&self, id: &str) -> Result<Option<WorkflowTemplate>, DomainError> {
        let workflow_id = self.parse_id(id)?;

        match self.storage.get(&workflow_id).await? {
            Some(workflow) => Ok(Some(revalidate(&workflow)?)),
            None => Ok(None),
        }
    }

    pub async fn get_required(&self, id: &str) -> Result<WorkflowTemplate, DomainError> {
        self.get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Workflow '{}' not found", id)))
    }

    /// Load every stored workflow that still passes validation
    pub async fn load_workflows(&self) -> Result<Vec<WorkflowTemplate>, DomainError> {
        let stored = self.storage.list().await?;
        let mut workflows = Vec::with_capacity(stored.len());

        for workflow in stored {
            match revalidate(&workflow) {
                Ok(valid) => workflows.push(valid),
                Err(e) => warn!(
                    workflow_id = %workflow.id(),
                    error = %e,
                    "Skipping stored workflow that no longer validates"
                ),
            }
        }

        Ok(workflows)
    }

    /// Check a candidate document without saving it
    pub fn validate(&self, candidate: &Value) -> ValidationOutcome {
        validate(candidate)
    }

    /// Create a workflow from a raw document; the id must be unused
    #[instrument(skip(self, candidate))]
    pub async fn create(&self, candidate: &Value) -> Result<WorkflowTemplate, DomainError> {
        let workflow = validate(candidate).into_result()?;

        if self.storage.exists(workflow.id()).await? {
            return Err(DomainError::conflict(format!(
                "Workflow with ID '{}' already exists",
                workflow.id()
            )));
        }

        self.storage.create(workflow).await
    }

    /// Replace an existing workflow with a raw document
    #[instrument(skip(self, candidate))]
    pub async fn update(&self, id: &str, candidate: &Value) -> Result<WorkflowTemplate, DomainError> {
        let workflow_id = self.parse_id(id)?;
        let workflow = validate(candidate).into_result()?;

        if workflow.id() != &workflow_id {
            return Err(DomainError::validation(format!(
                "Workflow id '{}' does not match '{}'",
                workflow.id(),
                id
            )));
        }

        if !self.storage.exists(&workflow_id).await? {
            return Err(DomainError::not_found(format!("Workflow '{}' not found", id)));
        }

        self.storage.update(workflow).await
    }

    /// Validate then upsert a raw document
    pub async fn import(&self, candidate: &Value) -> Result<WorkflowTemplate, DomainError> {
        let workflow = validate(candidate).into_result()?;
        self.save_workflow(workflow).await
    }

    /// Upsert by id after re-validating the definition
    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id()))]
    pub async fn save_workflow(
        &self,
        workflow: WorkflowTemplate,
    ) -> Result<WorkflowTemplate, DomainError> {
        let workflow = revalidate(&workflow)?;
        let saved = self.storage.save(workflow).await?;

        info!(steps = saved.step_count(), "Workflow saved");
        Ok(saved)
    }

    pub async fn delete_workflow(&self, id: &str) -> Result<bool, DomainError> {
        let workflow_id = self.parse_id(id)?;
        self.storage.delete(&workflow_id).await
    }

    /// Start a run. Without an initial prompt the workflow's trigger supplies it.
    #[instrument(skip(self, initial_prompt))]
    pub async fn start_run(
        &self,
        id: &str,
        initial_prompt: Option<String>,
    ) -> Result<RunHandle, DomainError> {
        let workflow = self.get_required(id).await?;

        let initial_prompt = match initial_prompt {
            Some(prompt) => prompt,
            None => self.executor.resolve_trigger(&workflow).await?,
        };

        Ok(self.executor.start_workflow(workflow, initial_prompt).await?)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<RunView, DomainError> {
        let run = self.snapshot(run_id).await?;
        let steps = match self.executed_workflow(&run).await? {
            Some(workflow) => step_statuses(&workflow, &run),
            None => BTreeMap::new(),
        };

        Ok(RunView { run, steps })
    }

    pub async fn submit_decision(&self, decision: HumanDecision) -> Result<(), DomainError> {
        Ok(self.executor.submit_decision(decision).await?)
    }

    pub async fn cancel_run(&self, run_id: &str) -> Result<(), DomainError> {
        let run_id = RunId::parse(run_id)?;
        Ok(self.executor.cancel(&run_id).await?)
    }

    /// Evaluate a query against a run's recorded outputs
    pub async fn query_run(&self, run_id: &str, query: &str) -> Result<QueryResult, DomainError> {
        let run = self.snapshot(run_id).await?;
        let workflow = self.executed_workflow(&run).await?.ok_or_else(|| {
            DomainError::not_found(format!("Workflow '{}' not found", run.workflow_id))
        })?;

        let context = ExecutionContext::from_outputs(Arc::new(workflow), run.outputs);
        Ok(resolve(query, &context))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.executor.subscribe()
    }

    async fn snapshot(&self, run_id: &str) -> Result<WorkflowRun, DomainError> {
        let parsed = RunId::parse(run_id)?;

        self.executor
            .snapshot(&parsed)
            .await
            .ok_or_else(|| DomainError::not_found(format!("Run '{}' not found", run_id)))
    }

    /// The definition a run executed. Records written without one fall back
    /// to the stored workflow.
    async fn executed_workflow(
        &self,
        run: &WorkflowRun,
    ) -> Result<Option<WorkflowTemplate>, DomainError> {
        match &run.workflow {
            Some(workflow) => Ok(Some(workflow.clone())),
            None => self.storage.get(&run.workflow_id).await,
        }
    }

    fn parse_id(&self, id: &str) -> Result<WorkflowId, DomainError> {
        WorkflowId::new(id).map_err(|e| DomainError::invalid_id(e.to_string()))
    }
}

/// Derive step statuses from a snapshot by replaying the events it implies
fn step_statuses(workflow: &WorkflowTemplate, run: &WorkflowRun) -> BTreeMap<String, StepStatus> {
    let completed = run.step_outputs().len();

    let events: Vec<RunEvent> = workflow
        .steps()
        .iter()
        .enumerate()
        .filter_map(|(index, step)| {
            let kind = if index < completed {
                RunEventKind::Succeeded
            } else if run.failed_step_id.as_deref() == Some(step.id()) {
                RunEventKind::Failed
            } else if run.current_step == Some(index) && run.status == RunStatus::Cancelled {
                RunEventKind::Failed
            } else if run.current_step == Some(index) && !run.is_terminal() {
                RunEventKind::Started
            } else {
                return None;
            };
            Some(RunEvent::step(run.run_id.clone(), step.id(), kind))
        })
        .collect();

    project(workflow.steps(), &events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::MockLlmProvider;
    use crate::domain::sandbox::MockFunctionSandbox;
    use crate::domain::storage::mock::MockStorage;
    use crate::domain::tool::MockToolInvoker;
    use crate::domain::workflow::project_run;
    use crate::infrastructure::storage::InMemoryStorage;
    use crate::infrastructure::workflow::{Collaborators, ExecutorConfig, WorkflowEngine};
    use serde_json::json;

    fn engine(llm: Arc<MockLlmProvider>) -> Arc<WorkflowEngine> {
        let collaborators = Collaborators {
            llm,
            tools: Arc::new(MockToolInvoker::new()),
            sandbox: Arc::new(MockFunctionSandbox::new()),
            prompts: Arc::new(InMemoryStorage::new()),
        };

        Arc::new(WorkflowEngine::new(
            collaborators,
            Arc::new(InMemoryStorage::new()),
            ExecutorConfig::default(),
        ))
    }

    fn service_with(llm: Arc<MockLlmProvider>) -> WorkflowService {
        WorkflowService::new(Arc::new(InMemoryStorage::new()), engine(llm))
    }

    fn service() -> WorkflowService {
        service_with(Arc::new(MockLlmProvider::new("mock")))
    }

    fn document(id: &str) -> Value {
        json!({
            "id": id,
            "name": "Digest",
            "description": "",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z",
            "triggerType": "custom",
            "triggerPrompt": "Summarize: hello",
            "steps": [
                {"id": "s1", "name": "Summarize", "type": "custom-prompt", "modelId": "openai:gpt-4o", "promptContent": "{{ text }}", "inputMapping": {"text": "$.initial_step"}}
            ]
        })
    }

    fn transform_document(id: &str) -> Value {
        json!({
            "id": id,
            "name": "Shape",
            "description": "",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z",
            "triggerType": "custom",
            "triggerPrompt": "hello",
            "steps": [
                {"id": "t1", "name": "Shape", "type": "transform", "transformMappings": {"text": "$.initial_step"}}
            ]
        })
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let service = service();

        let created = service.create(&document("wf-1")).await.unwrap();
        assert_eq!(created.step_count(), 1);

        let fetched = service.get_required("wf-1").await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_create_duplicate_conflicts() {
        let service = service();
        service.create(&document("wf-1")).await.unwrap();

        let err = service.create(&document("wf-1")).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_document() {
        let mut candidate = document("wf-1");
        candidate["steps"][0]["toolName"] = json!("search");

        let err = service().create(&candidate).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation { .. }));
        assert!(err.to_string().contains("toolName"));
    }

    #[tokio::test]
    async fn test_validate_does_not_save() {
        let service = service();

        let outcome = service.validate(&document("wf-1"));
        assert!(outcome.is_valid);
        assert!(service.get("wf-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_import_upserts() {
        let service = service();
        service.import(&document("wf-1")).await.unwrap();

        let mut renamed = document("wf-1");
        renamed["name"] = json!("Renamed");
        service.import(&renamed).await.unwrap();

        let workflows = service.load_workflows().await.unwrap();
        assert_eq!(workflows.len(), 1);
        assert_eq!(workflows[0].name(), "Renamed");
    }

    #[tokio::test]
    async fn test_import_missing_steps_saves_nothing() {
        let service = service();
        let mut candidate = document("wf-1");
        candidate.as_object_mut().unwrap().remove("steps");

        let err = service.import(&candidate).await.unwrap_err();
        assert!(err.to_string().contains("steps"));
        assert!(service.load_workflows().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_requires_matching_id() {
        let service = service();
        service.create(&document("wf-1")).await.unwrap();

        let err = service.update("wf-1", &document("wf-2")).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation { .. }));

        let err = service.update("wf-2", &document("wf-2")).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_workflow() {
        let service = service();
        service.create(&document("wf-1")).await.unwrap();

        assert!(service.delete_workflow("wf-1").await.unwrap());
        assert!(!service.delete_workflow("wf-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_id() {
        let err = service().get("not valid!").await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidId { .. }));
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces() {
        let storage = MockStorage::<WorkflowTemplate>::new().with_error("disk full");
        let service = WorkflowService::new(Arc::new(storage), engine(Arc::new(MockLlmProvider::new("mock"))));

        let err = service.load_workflows().await.unwrap_err();
        assert!(matches!(err, DomainError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_start_run_resolves_trigger() {
        let llm = Arc::new(MockLlmProvider::new("mock").with_text("A short summary"));
        let service = service_with(llm.clone());
        service.create(&document("wf-1")).await.unwrap();

        let mut handle = service.start_run("wf-1", None).await.unwrap();
        let run = handle.wait().await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.outputs, vec![json!("Summarize: hello"), json!("A short summary")]);

        let requests = llm.requests();
        assert_eq!(requests[0].0, "openai:gpt-4o");
        assert!(requests[0].1.messages[0].content.contains("Summarize: hello"));
    }

    #[tokio::test]
    async fn test_start_run_unknown_workflow() {
        let err = service().start_run("ghost", Some("hi".into())).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_run_view_and_query() {
        let service = service();
        service.create(&transform_document("wf-1")).await.unwrap();

        let mut handle = service
            .start_run("wf-1", Some("hi there".into()))
            .await
            .unwrap();
        handle.wait().await;
        let run_id = handle.run_id().to_string();

        let view = service.get_run(&run_id).await.unwrap();
        assert_eq!(view.run.status, RunStatus::Success);
        assert_eq!(view.steps["t1"], StepStatus::Success);

        let result = service.query_run(&run_id, "$.outputs[1].text").await.unwrap();
        assert!(result.is_valid);
        assert_eq!(result.value, Some(json!("hi there")));

        let miss = service.query_run(&run_id, "$.outputs[5]").await.unwrap();
        assert!(!miss.is_valid);
    }

    #[tokio::test]
    async fn test_run_history_survives_workflow_delete() {
        let service = service();
        service.create(&transform_document("wf-1")).await.unwrap();

        let mut handle = service
            .start_run("wf-1", Some("hi there".into()))
            .await
            .unwrap();
        handle.wait().await;
        let run_id = handle.run_id().to_string();

        assert!(service.delete_workflow("wf-1").await.unwrap());

        let view = service.get_run(&run_id).await.unwrap();
        assert_eq!(view.steps["t1"], StepStatus::Success);

        let result = service.query_run(&run_id, "$.workflow.name").await.unwrap();
        assert_eq!(result.value, Some(json!("Shape")));
    }

    #[tokio::test]
    async fn test_run_view_uses_executed_definition() {
        let service = service();
        service.create(&transform_document("wf-1")).await.unwrap();

        let mut handle = service.start_run("wf-1", Some("hi".into())).await.unwrap();
        handle.wait().await;
        let run_id = handle.run_id().to_string();

        let mut edited = transform_document("wf-1");
        edited["name"] = json!("Edited");
        edited["steps"][0]["id"] = json!("t2");
        service.update("wf-1", &edited).await.unwrap();

        let view = service.get_run(&run_id).await.unwrap();
        assert_eq!(view.steps.keys().collect::<Vec<_>>(), vec!["t1"]);

        let result = service.query_run(&run_id, "$.workflow.name").await.unwrap();
        assert_eq!(result.value, Some(json!("Shape")));
    }

    #[tokio::test]
    async fn test_cancelled_run_view_matches_events() {
        let service = service();
        let mut document = transform_document("wf-1");
        document["steps"] = json!([
            {"id": "h1", "name": "Review", "type": "human-in-the-loop", "instructionsForHuman": "ok?"}
        ]);
        service.create(&document).await.unwrap();

        let mut events = service.subscribe();
        let mut handle = service.start_run("wf-1", None).await.unwrap();
        handle
            .wait_for(|run| run.status == RunStatus::PausedForHuman)
            .await;
        let run_id = handle.run_id().clone();

        service.cancel_run(run_id.as_str()).await.unwrap();
        let run = handle.wait().await;
        assert_eq!(run.status, RunStatus::Cancelled);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        let workflow = service.get_required("wf-1").await.unwrap();
        let from_events = project_run(workflow.steps(), &run_id, &seen);

        let view = service.get_run(run_id.as_str()).await.unwrap();
        assert_eq!(from_events["h1"], StepStatus::Error);
        assert_eq!(view.steps, from_events);
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let err = service()
            .get_run("00000000-0000-4000-8000-000000000000")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { .. }));
    }

    #[test]
    fn test_step_statuses_from_failed_snapshot() {
        let workflow = validate(&json!({
            "id": "wf",
            "name": "Three",
            "description": "",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z",
            "triggerType": "custom",
            "triggerPrompt": "go",
            "steps": [
                {"id": "a", "name": "A", "type": "transform", "transformMappings": {}},
                {"id": "b", "name": "B", "type": "transform", "transformMappings": {}},
                {"id": "c", "name": "C", "type": "transform", "transformMappings": {}}
            ]
        }))
        .into_result()
        .unwrap();

        let mut run = WorkflowRun::new(RunId::generate(), workflow.id().clone());
        run.status = RunStatus::Error;
        run.outputs = vec![json!("go"), json!({})];
        run.current_step = Some(1);
        run.failed_step_id = Some("b".to_string());

        let statuses = step_statuses(&workflow, &run);
        assert_eq!(statuses["a"], StepStatus::Success);
        assert_eq!(statuses["b"], StepStatus::Error);
        assert_eq!(statuses["c"], StepStatus::Pending);
    }
}
