//! Workflow engine: run registry, run tasks and human pause/resume

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};

use super::config::{ExecutorConfig, HumanTimeoutAction};
use super::runner::{Collaborators, StepRunner};
use crate::domain::workflow::validation::revalidate;
use crate::domain::workflow::{
    Decision, EventBus, HumanStep, PendingHuman, RunError, RunEventKind,
};
use crate::domain::{
    ExecutionContext, HumanDecision, RunEvent, RunHandle, RunId, RunStatus, StepKind, Storage,
    WorkflowError, WorkflowExecutor, WorkflowId, WorkflowRun, WorkflowStep, WorkflowTemplate,
};
use crate::infrastructure::observability::{record_workflow_run, record_workflow_step};

const DECISION_BUFFER: usize = 8;

/// Registry entry for a run that has not reached a terminal status
struct ActiveRun {
    decisions: mpsc::Sender<HumanDecision>,
    cancel: CancellationToken,
    updates: watch::Receiver<WorkflowRun>,
}

struct EngineState {
    runner: StepRunner,
    runs: Arc<dyn Storage<WorkflowRun>>,
    config: ExecutorConfig,
    events: EventBus,
    active: DashMap<RunId, ActiveRun>,
    /// Workflow id to its running run, when single-run locking is enabled
    locks: DashMap<WorkflowId, RunId>,
}

impl EngineState {
    fn release(&self, run_id: &RunId, workflow_id: &WorkflowId) {
        self.active.remove(run_id);
        self.locks.remove_if(workflow_id, |_, holder| holder == run_id);
    }
}

/// [`WorkflowExecutor`] running each workflow on its own tokio task
#[derive(Clone)]
pub struct WorkflowEngine {
    state: Arc<EngineState>,
}

impl WorkflowEngine {
    pub fn new(
        collaborators: Collaborators,
        runs: Arc<dyn Storage<WorkflowRun>>,
        config: ExecutorConfig,
    ) -> Self {
        let runner = StepRunner::new(collaborators, Duration::from_millis(config.step_timeout_ms));
        let events = EventBus::new(config.event_capacity);

        Self {
            state: Arc::new(EngineState {
                runner,
                runs,
                config,
                events,
                active: DashMap::new(),
                locks: DashMap::new(),
            }),
        }
    }

    /// Ids of runs that have not finished
    pub fn active_runs(&self) -> Vec<RunId> {
        self.state.active.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.state.config
    }

    fn acquire_lock(&self, workflow_id: &WorkflowId, run_id: &RunId) -> Result<(), WorkflowError> {
        if !self.state.config.single_run_per_workflow {
            return Ok(());
        }

        match self.state.locks.entry(workflow_id.clone()) {
            Entry::Occupied(holder) => Err(WorkflowError::conflict(format!(
                "Workflow '{}' already has an active run ({})",
                workflow_id,
                holder.get()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(run_id.clone());
                Ok(())
            }
        }
    }

    /// Explain why a run id has no registry entry
    async fn inactive_error(&self, run_id: &RunId) -> WorkflowError {
        match self.state.runs.get(run_id).await {
            Ok(Some(run)) => WorkflowError::invalid_state(format!(
                "Run '{}' is not active (status: {})",
                run_id,
                run.status.as_str()
            )),
            _ => WorkflowError::not_found(format!("Run '{}' not found", run_id)),
        }
    }

    /// Finalize a stored run that is not terminal but has no task in this
    /// process, e.g. a run paused before a restart
    async fn cancel_orphaned(&self, mut run: WorkflowRun) -> Result<(), WorkflowError> {
        info!(run_id = %run.run_id, status = run.status.as_str(), "Cancelling orphaned run");

        let step_id = run
            .pending_human
            .as_ref()
            .map(|pending| pending.step_id.clone())
            .or_else(|| {
                let index = run.current_step?;
                let workflow = run.workflow.as_ref()?;
                workflow.steps().get(index).map(|step| step.id().to_string())
            });

        run.status = RunStatus::Cancelled;
        run.pending_human = None;
        run.finished_at = Some(Utc::now());

        self.state
            .runs
            .save(run.clone())
            .await
            .map_err(|e| WorkflowError::persistence(e.to_string()))?;
        self.state.release(&run.run_id, &run.workflow_id);

        if let Some(step_id) = step_id {
            self.state.events.publish(
                RunEvent::step(run.run_id.clone(), step_id, RunEventKind::Failed)
                    .with_detail("cancelled"),
            );
        }
        self.state.events.publish(
            RunEvent::run(run.run_id.clone(), RunEventKind::Failed).with_detail("cancelled"),
        );
        record_workflow_run(RunStatus::Cancelled.as_str());

        Ok(())
    }
}

#[async_trait]
impl WorkflowExecutor for WorkflowEngine {
    async fn resolve_trigger(&self, workflow: &WorkflowTemplate) -> Result<String, WorkflowError> {
        self.state.runner.resolve_trigger(workflow).await
    }

    #[instrument(skip(self, workflow, initial_prompt), fields(workflow_id = %workflow.id()))]
    async fn start_workflow(
        &self,
        workflow: WorkflowTemplate,
        initial_prompt: String,
    ) -> Result<RunHandle, WorkflowError> {
        if workflow.is_empty() {
            return Err(WorkflowError::validation(
                "Workflow must have at least one step",
            ));
        }

        let workflow = revalidate(&workflow)?;

        if initial_prompt.trim().is_empty() {
            return Err(WorkflowError::validation("Trigger produced empty input"));
        }

        let run_id = RunId::generate();
        self.acquire_lock(workflow.id(), &run_id)?;

        let run =
            WorkflowRun::new(run_id.clone(), workflow.id().clone()).with_workflow(workflow.clone());
        let (updates, receiver) = watch::channel(run);
        let (decision_tx, decision_rx) = mpsc::channel(DECISION_BUFFER);
        let cancel = CancellationToken::new();

        self.state.active.insert(
            run_id.clone(),
            ActiveRun {
                decisions: decision_tx,
                cancel: cancel.clone(),
                updates: receiver.clone(),
            },
        );

        info!(run_id = %run_id, steps = workflow.step_count(), "Starting workflow run");

        let task = RunTask {
            state: self.state.clone(),
            workflow: Arc::new(workflow),
            run_id: run_id.clone(),
            updates,
            decisions: decision_rx,
            cancel,
        };
        let span = tracing::info_span!("workflow_run", run_id = %run_id);
        tokio::spawn(task.run(initial_prompt).instrument(span));

        Ok(RunHandle::new(run_id, receiver))
    }

    async fn submit_decision(&self, decision: HumanDecision) -> Result<(), WorkflowError> {
        let lookup = self
            .state
            .active
            .get(&decision.run_id)
            .map(|active| (active.updates.borrow().clone(), active.decisions.clone()));
        let Some((current, sender)) = lookup else {
            return Err(self.inactive_error(&decision.run_id).await);
        };

        let paused_here = current.status == RunStatus::PausedForHuman
            && current
                .pending_human
                .as_ref()
                .is_some_and(|pending| pending.step_id == decision.step_id);

        if !paused_here {
            return Err(WorkflowError::invalid_state(format!(
                "Run '{}' is not waiting on step '{}'",
                decision.run_id, decision.step_id
            )));
        }

        debug!(run_id = %decision.run_id, step_id = %decision.step_id, "Submitting human decision");

        sender
            .send(decision)
            .await
            .map_err(|_| WorkflowError::invalid_state("Run finished before the decision arrived"))
    }

    async fn cancel(&self, run_id: &RunId) -> Result<(), WorkflowError> {
        let token = self.state.active.get(run_id).map(|active| active.cancel.clone());

        match token {
            Some(token) => {
                info!(run_id = %run_id, "Cancelling workflow run");
                token.cancel();
                Ok(())
            }
            None => match self.state.runs.get(run_id).await {
                Ok(Some(run)) if !run.is_terminal() => self.cancel_orphaned(run).await,
                _ => Err(self.inactive_error(run_id).await),
            },
        }
    }

    async fn snapshot(&self, run_id: &RunId) -> Option<WorkflowRun> {
        let live = self
            .state
            .active
            .get(run_id)
            .map(|active| active.updates.borrow().clone());
        if live.is_some() {
            return live;
        }

        match self.state.runs.get(run_id).await {
            Ok(run) => run,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Failed to load run record");
                None
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.state.events.subscribe()
    }
}

/// One run, owned by its spawned task
struct RunTask {
    state: Arc<EngineState>,
    workflow: Arc<WorkflowTemplate>,
    run_id: RunId,
    updates: watch::Sender<WorkflowRun>,
    decisions: mpsc::Receiver<HumanDecision>,
    cancel: CancellationToken,
}

impl RunTask {
    async fn run(mut self, initial_prompt: String) {
        let mut run = self.updates.borrow().clone();
        let initial = Value::String(initial_prompt);

        run.status = RunStatus::Running;
        run.outputs = vec![initial.clone()];
        self.publish(&run);
        self.emit(RunEvent::run(self.run_id.clone(), RunEventKind::Started));

        let mut context = ExecutionContext::new(self.workflow.clone(), initial);
        let workflow = self.workflow.clone();

        for (index, step) in workflow.steps().iter().enumerate() {
            run.current_step = Some(index);
            self.publish(&run);
            self.emit_step(step, RunEventKind::Started, None);

            let started = Instant::now();
            let result = match step.kind() {
                StepKind::HumanInTheLoop(human) => {
                    self.await_human(&mut run, step, human, &context).await
                }
                _ => {
                    let previous = index.checked_sub(1).and_then(|i| workflow.steps().get(i));
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => Err(WorkflowError::Cancelled),
                        result = self.state.runner.execute(step, previous, &context) => result,
                    }
                }
            };

            let outcome = match &result {
                Ok(_) => "success",
                Err(WorkflowError::Cancelled) => "cancelled",
                Err(_) => "error",
            };
            record_workflow_step(step.type_name(), outcome, started.elapsed());

            match result {
                Ok(output) => {
                    context.append_output(output.clone());
                    run.outputs.push(output);
                    self.publish(&run);
                    self.emit_step(step, RunEventKind::Succeeded, None);
                }
                Err(WorkflowError::Cancelled) => {
                    self.emit_step(step, RunEventKind::Failed, Some("cancelled".to_string()));
                    self.finish(run, RunStatus::Cancelled).await;
                    return;
                }
                Err(err) => {
                    warn!(step_id = %step.id(), error = %err, "Step failed");
                    self.emit_step(step, RunEventKind::Failed, Some(err.to_string()));
                    run.failed_step_id = Some(step.id().to_string());
                    run.error = Some(RunError::from(&err));
                    self.finish(run, RunStatus::Error).await;
                    return;
                }
            }
        }

        run.current_step = None;
        self.finish(run, RunStatus::Success).await;
    }

    async fn await_human(
        &mut self,
        run: &mut WorkflowRun,
        step: &WorkflowStep,
        human: &HumanStep,
        context: &ExecutionContext,
    ) -> Result<Value, WorkflowError> {
        run.status = RunStatus::PausedForHuman;
        run.pending_human = Some(PendingHuman {
            step_id: step.id().to_string(),
            instructions: human.instructions_for_human.clone(),
        });

        self.state
            .runs
            .save(run.clone())
            .await
            .map_err(|e| WorkflowError::persistence(e.to_string()))?;

        self.publish(run);
        self.emit_step(
            step,
            RunEventKind::Paused,
            Some(human.instructions_for_human.clone()),
        );
        info!(step_id = %step.id(), "Run paused for human decision");

        let deadline = human_deadline(self.state.config.human_timeout_secs);
        tokio::pin!(deadline);

        let decision = loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(WorkflowError::Cancelled),
                received = self.decisions.recv() => received,
                _ = &mut deadline => {
                    let action = self.state.config.human_timeout_action;
                    info!(step_id = %step.id(), ?action, "Human decision timed out");
                    Some(match action {
                        HumanTimeoutAction::Approve => {
                            HumanDecision::approve(self.run_id.clone(), step.id())
                        }
                        HumanTimeoutAction::Reject => {
                            HumanDecision::reject(self.run_id.clone(), step.id())
                        }
                    })
                }
            };

            match received {
                Some(decision) if decision.step_id == step.id() => break decision,
                Some(stale) => {
                    warn!(step_id = %stale.step_id, "Ignoring decision for another step");
                }
                None => return Err(WorkflowError::Cancelled),
            }
        };

        run.status = RunStatus::Running;
        run.pending_human = None;
        self.publish(run);

        match decision.decision {
            Decision::Approve => {
                self.emit_step(step, RunEventKind::Resumed, None);
                Ok(decision
                    .data
                    .unwrap_or_else(|| context.last_output().clone()))
            }
            Decision::Reject => Err(WorkflowError::HumanRejected {
                step_id: step.id().to_string(),
            }),
        }
    }

    async fn finish(&self, mut run: WorkflowRun, status: RunStatus) {
        run.status = status;
        run.pending_human = None;
        run.finished_at = Some(Utc::now());

        if let Err(e) = self.state.runs.save(run.clone()).await {
            error!(error = %e, "Failed to persist run record");
        }

        // Leave the registry before the terminal snapshot is observable
        self.state.release(&self.run_id, self.workflow.id());
        self.publish(&run);

        let event = RunEvent::run(self.run_id.clone(), terminal_event(status));
        let event = match &run.error {
            Some(err) => event.with_detail(err.message.clone()),
            None if status == RunStatus::Cancelled => event.with_detail("cancelled"),
            None => event,
        };
        self.emit(event);

        record_workflow_run(status.as_str());
        info!(status = status.as_str(), outputs = run.outputs.len(), "Workflow run finished");
    }

    fn publish(&self, run: &WorkflowRun) {
        self.updates.send_replace(run.clone());
    }

    fn emit(&self, event: RunEvent) {
        self.state.events.publish(event);
    }

    fn emit_step(&self, step: &WorkflowStep, kind: RunEventKind, detail: Option<String>) {
        let event = RunEvent::step(self.run_id.clone(), step.id(), kind);
        self.emit(match detail {
            Some(detail) => event.with_detail(detail),
            None => event,
        });
    }
}

fn terminal_event(status: RunStatus) -> RunEventKind {
    match status {
        RunStatus::Success => RunEventKind::Succeeded,
        _ => RunEventKind::Failed,
    }
}

async fn human_deadline(timeout_secs: Option<u64>) {
    match timeout_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::MockLlmProvider;
    use crate::domain::prompt::{PromptId, PromptTemplate, PromptVariable, VariableType};
    use crate::domain::sandbox::MockFunctionSandbox;
    use crate::domain::storage::mock::MockStorage;
    use crate::domain::tool::{MockToolInvoker, ToolError};
    use crate::domain::workflow::validation::validate;
    use crate::domain::workflow::{
        project_run, CustomPromptStep, FunctionLanguage, FunctionStep, StepStatus, TemplateStep,
        ToolCallStep, TransformStep,
    };
    use crate::infrastructure::storage::InMemoryStorage;
    use serde_json::json;
    use tokio_test::assert_ok;

    struct Harness {
        engine: WorkflowEngine,
        llm: Arc<MockLlmProvider>,
        runs: Arc<InMemoryStorage<WorkflowRun>>,
    }

    fn harness_with(
        llm: MockLlmProvider,
        tools: MockToolInvoker,
        sandbox: MockFunctionSandbox,
        prompts: Vec<PromptTemplate>,
        config: ExecutorConfig,
    ) -> Harness {
        let llm = Arc::new(llm);
        let runs = Arc::new(InMemoryStorage::new());
        let collaborators = Collaborators {
            llm: llm.clone(),
            tools: Arc::new(tools),
            sandbox: Arc::new(sandbox),
            prompts: Arc::new(InMemoryStorage::with_entities(prompts)),
        };

        Harness {
            engine: WorkflowEngine::new(collaborators, runs.clone(), config),
            llm,
            runs,
        }
    }

    fn harness(llm: MockLlmProvider) -> Harness {
        harness_with(
            llm,
            MockToolInvoker::new(),
            MockFunctionSandbox::new(),
            vec![],
            ExecutorConfig::default(),
        )
    }

    fn workflow(id: &str, steps: Vec<WorkflowStep>) -> WorkflowTemplate {
        WorkflowTemplate::new(WorkflowId::new(id).unwrap(), id)
            .with_custom_trigger("Summarize: hello")
            .with_steps(steps)
    }

    fn ask(id: &str) -> WorkflowStep {
        WorkflowStep::new(
            id,
            id,
            StepKind::CustomPrompt(CustomPromptStep::new("gpt-4o", format!("Step {}", id))),
        )
    }

    fn review(id: &str) -> WorkflowStep {
        WorkflowStep::new(
            id,
            "Review",
            StepKind::HumanInTheLoop(HumanStep::new("Check the draft")),
        )
    }

    async fn paused(handle: &mut RunHandle) -> WorkflowRun {
        handle
            .wait_for(|run| run.status == RunStatus::PausedForHuman || run.is_terminal())
            .await
    }

    #[tokio::test]
    async fn test_single_prompt_step_scenario() {
        let intro = PromptTemplate::new(PromptId::new("intro").unwrap(), "Intro", "Say hi");
        let h = harness_with(
            MockLlmProvider::new("mock").with_text("Hi!"),
            MockToolInvoker::new(),
            MockFunctionSandbox::new(),
            vec![intro],
            ExecutorConfig::default(),
        );
        let wf = workflow(
            "greet",
            vec![WorkflowStep::new(
                "p",
                "Prompt",
                StepKind::Prompt(TemplateStep::new("gpt-4o", "intro")),
            )],
        );

        let mut handle = h
            .engine
            .start_workflow(wf, "Summarize: hello".to_string())
            .await
            .unwrap();
        let run = handle.wait().await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.outputs, vec![json!("Summarize: hello"), json!("Hi!")]);
        assert!(run.finished_at.is_some());

        let stored = h.runs.get(handle.run_id()).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_transform_feeds_next_prompt_scenario() {
        let digest = PromptTemplate::new(PromptId::new("digest").unwrap(), "Digest", "{{summary}}")
            .with_variable(PromptVariable::required("summary", VariableType::String));
        let h = harness_with(
            MockLlmProvider::new("mock").with_text("done"),
            MockToolInvoker::new(),
            MockFunctionSandbox::new(),
            vec![digest],
            ExecutorConfig::default(),
        );
        let wf = workflow(
            "chain",
            vec![
                WorkflowStep::new(
                    "shape",
                    "Shape",
                    StepKind::Transform(TransformStep::new().with_mapping("summary", "$.outputs[0]")),
                ),
                WorkflowStep::new(
                    "write",
                    "Write",
                    StepKind::Prompt(TemplateStep::new("gpt-4o", "digest")),
                ),
            ],
        );

        let mut handle = h
            .engine
            .start_workflow(wf, "raw trigger text".to_string())
            .await
            .unwrap();
        let run = handle.wait().await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.outputs[1], json!({"summary": "raw trigger text"}));
        let requests = h.llm.requests();
        assert_eq!(requests[0].1.messages[0].content_text(), "raw trigger text");
    }

    #[test]
    fn test_import_without_steps_scenario() {
        let outcome = validate(&json!({
            "id": "broken",
            "name": "Broken",
            "description": "",
            "createdAt": "2026-01-01T00:00:00Z",
            "updatedAt": "2026-01-01T00:00:00Z"
        }));

        assert!(!outcome.is_valid);
        assert!(outcome.error.unwrap().contains("steps"));
    }

    #[tokio::test]
    async fn test_failing_middle_step_halts_run() {
        let h = harness(
            MockLlmProvider::new("mock")
                .with_text("from a")
                .with_error("model exploded")
                .with_text("from c"),
        );
        let wf = workflow("abc", vec![ask("a"), ask("b"), ask("c")]);
        let mut events = h.engine.subscribe();

        let mut handle = h
            .engine
            .start_workflow(wf.clone(), "go".to_string())
            .await
            .unwrap();
        let run = handle.wait().await;

        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.outputs.len(), 2);
        assert_eq!(run.failed_step_id.as_deref(), Some("b"));
        assert_eq!(run.error.as_ref().unwrap().kind, "model_invocation");
        assert_eq!(h.llm.call_count(), 2);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        let statuses = project_run(wf.steps(), handle.run_id(), &seen);
        assert_eq!(statuses["a"], StepStatus::Success);
        assert_eq!(statuses["b"], StepStatus::Error);
        assert_eq!(statuses["c"], StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_human_approve_passes_previous_output_through() {
        let h = harness(MockLlmProvider::new("mock").with_text("draft").with_text("final"));
        let wf = workflow("gate", vec![ask("draft"), review("check"), ask("publish")]);

        let mut handle = h.engine.start_workflow(wf, "go".to_string()).await.unwrap();
        let run = paused(&mut handle).await;

        assert_eq!(run.status, RunStatus::PausedForHuman);
        assert_eq!(run.pending_human.as_ref().unwrap().step_id, "check");
        assert_eq!(run.pending_human.as_ref().unwrap().instructions, "Check the draft");

        let stored = h.runs.get(handle.run_id()).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::PausedForHuman);

        assert_ok!(
            h.engine
                .submit_decision(HumanDecision::approve(handle.run_id().clone(), "check"))
                .await
        );
        let run = handle.wait().await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(
            run.outputs,
            vec![json!("go"), json!("draft"), json!("draft"), json!("final")]
        );
        assert!(run.pending_human.is_none());
    }

    #[tokio::test]
    async fn test_human_approve_with_edited_data() {
        let h = harness(MockLlmProvider::new("mock").with_text("draft"));
        let wf = workflow("gate", vec![ask("draft"), review("check")]);

        let mut handle = h.engine.start_workflow(wf, "go".to_string()).await.unwrap();
        paused(&mut handle).await;

        h.engine
            .submit_decision(
                HumanDecision::approve(handle.run_id().clone(), "check")
                    .with_data(json!({"edited": "better draft"})),
            )
            .await
            .unwrap();
        let run = handle.wait().await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.outputs[2], json!({"edited": "better draft"}));
    }

    #[tokio::test]
    async fn test_human_reject_fails_run() {
        let h = harness(MockLlmProvider::new("mock").with_text("draft"));
        let wf = workflow("gate", vec![ask("draft"), review("check"), ask("publish")]);

        let mut handle = h.engine.start_workflow(wf, "go".to_string()).await.unwrap();
        paused(&mut handle).await;

        h.engine
            .submit_decision(HumanDecision::reject(handle.run_id().clone(), "check"))
            .await
            .unwrap();
        let run = handle.wait().await;

        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.failed_step_id.as_deref(), Some("check"));
        assert_eq!(run.error.unwrap().kind, "human_rejected");
        assert_eq!(run.outputs.len(), 2);
        assert_eq!(h.llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_decision_for_wrong_step_is_rejected() {
        let h = harness(MockLlmProvider::new("mock"));
        let wf = workflow("gate", vec![review("check")]);

        let mut handle = h.engine.start_workflow(wf, "go".to_string()).await.unwrap();
        paused(&mut handle).await;

        let result = h
            .engine
            .submit_decision(HumanDecision::approve(handle.run_id().clone(), "other"))
            .await;
        assert!(matches!(result, Err(WorkflowError::InvalidState { .. })));

        let unknown = h
            .engine
            .submit_decision(HumanDecision::approve(RunId::generate(), "check"))
            .await;
        assert!(matches!(unknown, Err(WorkflowError::NotFound { .. })));

        h.engine.cancel(handle.run_id()).await.unwrap();
        handle.wait().await;
    }

    #[tokio::test]
    async fn test_cancel_paused_run() {
        let h = harness(MockLlmProvider::new("mock").with_text("draft"));
        let wf = workflow("gate", vec![ask("draft"), review("check"), ask("publish")]);
        let mut events = h.engine.subscribe();

        let mut handle = h.engine.start_workflow(wf, "go".to_string()).await.unwrap();
        paused(&mut handle).await;

        h.engine.cancel(handle.run_id()).await.unwrap();
        let run = handle.wait().await;

        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.outputs.len(), 2);

        let mut check_failed = false;
        while let Ok(event) = events.try_recv() {
            if event.step_id.as_deref() == Some("check") && event.kind == RunEventKind::Failed {
                check_failed = true;
            }
        }
        assert!(check_failed);

        let again = h.engine.cancel(handle.run_id()).await;
        assert!(matches!(again, Err(WorkflowError::InvalidState { .. })));
        assert_eq!(
            h.engine.snapshot(handle.run_id()).await.unwrap().status,
            RunStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_human_timeout_applies_action() {
        let h = harness_with(
            MockLlmProvider::new("mock").with_text("draft"),
            MockToolInvoker::new(),
            MockFunctionSandbox::new(),
            vec![],
            ExecutorConfig {
                human_timeout_secs: Some(0),
                human_timeout_action: HumanTimeoutAction::Approve,
                ..Default::default()
            },
        );
        let wf = workflow("gate", vec![ask("draft"), review("check")]);

        let mut handle = h.engine.start_workflow(wf, "go".to_string()).await.unwrap();
        let run = handle.wait().await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.outputs[2], json!("draft"));
    }

    #[tokio::test]
    async fn test_schema_mismatch_fails_step() {
        let h = harness(MockLlmProvider::new("mock").with_text("not json at all"));
        let step = WorkflowStep::new(
            "rate",
            "Rate",
            StepKind::CustomPrompt(CustomPromptStep::new("gpt-4o", "Rate").with_structured_output(
                crate::domain::workflow::StructuredOutput::new(json!({"type": "object"})),
            )),
        );

        let mut handle = h
            .engine
            .start_workflow(workflow("rate", vec![step]), "go".to_string())
            .await
            .unwrap();
        let run = handle.wait().await;

        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.error.unwrap().kind, "model_invocation");
    }

    #[tokio::test]
    async fn test_tool_and_function_steps() {
        let mut tools = MockToolInvoker::new();
        tools
            .expect_call_tool()
            .withf(|name, args| name == "lookup" && args["q"] == json!("go"))
            .times(1)
            .returning(|_, _| Ok(json!({"answer": 41})));

        let mut sandbox = MockFunctionSandbox::new();
        sandbox
            .expect_execute()
            .withf(|language, _, scope| {
                *language == FunctionLanguage::Jexl && scope["outputs"][1]["answer"] == json!(41)
            })
            .times(1)
            .returning(|_, _, _| Ok(json!(42)));

        let h = harness_with(
            MockLlmProvider::new("mock"),
            tools,
            sandbox,
            vec![],
            ExecutorConfig::default(),
        );
        let wf = workflow(
            "calc",
            vec![
                WorkflowStep::new(
                    "lookup",
                    "Lookup",
                    StepKind::ToolCall(ToolCallStep::new("lookup").with_mapping("q", "$.initial_step")),
                ),
                WorkflowStep::new(
                    "add",
                    "Add",
                    StepKind::Function(FunctionStep::new(
                        FunctionLanguage::Jexl,
                        "outputs[1].answer + 1",
                    )),
                ),
            ],
        );

        let mut handle = h.engine.start_workflow(wf, "go".to_string()).await.unwrap();
        let run = handle.wait().await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.outputs[2], json!(42));
    }

    #[tokio::test]
    async fn test_tool_error_is_tool_invocation() {
        let mut tools = MockToolInvoker::new();
        tools
            .expect_call_tool()
            .returning(|name, _| Err(ToolError::not_found(name)));

        let h = harness_with(
            MockLlmProvider::new("mock"),
            tools,
            MockFunctionSandbox::new(),
            vec![],
            ExecutorConfig::default(),
        );
        let wf = workflow(
            "tool",
            vec![WorkflowStep::new(
                "t",
                "T",
                StepKind::ToolCall(ToolCallStep::new("missing")),
            )],
        );

        let mut handle = h.engine.start_workflow(wf, "go".to_string()).await.unwrap();
        let run = handle.wait().await;

        assert_eq!(run.error.unwrap().kind, "tool_invocation");
    }

    #[tokio::test]
    async fn test_rejects_zero_steps_and_empty_trigger() {
        let h = harness(MockLlmProvider::new("mock"));

        let empty = h
            .engine
            .start_workflow(workflow("empty", vec![]), "go".to_string())
            .await;
        match empty {
            Err(WorkflowError::Validation { message }) => {
                assert!(message.contains("at least one step"))
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        let blank = h
            .engine
            .start_workflow(workflow("blank", vec![ask("a")]), "   ".to_string())
            .await;
        assert!(matches!(blank, Err(WorkflowError::Validation { .. })));
        assert!(h.engine.active_runs().is_empty());
        assert_eq!(h.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_single_run_lock() {
        let h = harness_with(
            MockLlmProvider::new("mock"),
            MockToolInvoker::new(),
            MockFunctionSandbox::new(),
            vec![],
            ExecutorConfig {
                single_run_per_workflow: true,
                ..Default::default()
            },
        );
        let wf = workflow("locked", vec![review("check")]);

        let mut first = h.engine.start_workflow(wf.clone(), "go".to_string()).await.unwrap();
        paused(&mut first).await;

        let second = h.engine.start_workflow(wf.clone(), "go".to_string()).await;
        assert!(matches!(second, Err(WorkflowError::Conflict { .. })));

        h.engine.cancel(first.run_id()).await.unwrap();
        first.wait().await;

        let mut third = h.engine.start_workflow(wf, "go".to_string()).await.unwrap();
        paused(&mut third).await;
        h.engine.cancel(third.run_id()).await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_persistence_failure_fails_run() {
        let collaborators = Collaborators {
            llm: Arc::new(MockLlmProvider::new("mock")),
            tools: Arc::new(MockToolInvoker::new()),
            sandbox: Arc::new(MockFunctionSandbox::new()),
            prompts: Arc::new(InMemoryStorage::new()),
        };
        let runs = Arc::new(MockStorage::<WorkflowRun>::new().with_error("disk full"));
        let engine = WorkflowEngine::new(collaborators, runs, ExecutorConfig::default());

        let mut handle = engine
            .start_workflow(workflow("gate", vec![review("check")]), "go".to_string())
            .await
            .unwrap();
        let run = handle.wait().await;

        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.error.unwrap().kind, "persistence");
    }

    #[tokio::test]
    async fn test_cancel_paused_run_after_restart() {
        let runs = Arc::new(InMemoryStorage::<WorkflowRun>::new());
        let collaborators = || Collaborators {
            llm: Arc::new(MockLlmProvider::new("mock").with_text("draft")),
            tools: Arc::new(MockToolInvoker::new()),
            sandbox: Arc::new(MockFunctionSandbox::new()),
            prompts: Arc::new(InMemoryStorage::<PromptTemplate>::new()),
        };
        let wf = workflow("gate", vec![ask("draft"), review("check")]);

        let before = WorkflowEngine::new(collaborators(), runs.clone(), ExecutorConfig::default());
        let mut handle = before.start_workflow(wf.clone(), "go".to_string()).await.unwrap();
        paused(&mut handle).await;
        let run_id = handle.run_id().clone();

        let after = WorkflowEngine::new(collaborators(), runs.clone(), ExecutorConfig::default());
        let mut events = after.subscribe();
        assert_ok!(after.cancel(&run_id).await);

        let stored = runs.get(&run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Cancelled);
        assert!(stored.pending_human.is_none());
        assert!(stored.finished_at.is_some());
        assert_eq!(after.snapshot(&run_id).await.unwrap().status, RunStatus::Cancelled);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].step_id.as_deref(), Some("check"));
        assert_eq!(seen[0].kind, RunEventKind::Failed);
        assert_eq!(seen[1].step_id, None);
        assert_eq!(seen[1].kind, RunEventKind::Failed);

        let again = after.cancel(&run_id).await;
        assert!(matches!(again, Err(WorkflowError::InvalidState { .. })));

        before.cancel(&run_id).await.unwrap();
        handle.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_decision_keeps_human_deadline() {
        let h = harness_with(
            MockLlmProvider::new("mock").with_text("draft"),
            MockToolInvoker::new(),
            MockFunctionSandbox::new(),
            vec![],
            ExecutorConfig {
                human_timeout_secs: Some(10),
                human_timeout_action: HumanTimeoutAction::Approve,
                ..Default::default()
            },
        );
        let wf = workflow("gate", vec![ask("draft"), review("check")]);

        let mut handle = h.engine.start_workflow(wf, "go".to_string()).await.unwrap();
        paused(&mut handle).await;
        let run_id = handle.run_id().clone();
        let sender = h.engine.state.active.get(&run_id).unwrap().decisions.clone();

        tokio::time::sleep(Duration::from_secs(6)).await;
        sender
            .send(HumanDecision::approve(run_id.clone(), "elsewhere"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        let run = h.engine.snapshot(&run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.outputs[2], json!("draft"));
    }
}
