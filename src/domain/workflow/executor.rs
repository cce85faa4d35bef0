//! Workflow executor trait and run handles

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use super::entity::WorkflowTemplate;
use super::error::WorkflowError;
use super::event::RunEvent;
use super::run::{HumanDecision, RunId, WorkflowRun};

/// Handle to a started run. The receiver always holds the latest snapshot.
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: RunId,
    updates: watch::Receiver<WorkflowRun>,
}

impl RunHandle {
    pub fn new(run_id: RunId, updates: watch::Receiver<WorkflowRun>) -> Self {
        Self { run_id, updates }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn snapshot(&self) -> WorkflowRun {
        self.updates.borrow().clone()
    }

    /// Wait until the run reaches a status matching `predicate`
    pub async fn wait_for<F>(&mut self, predicate: F) -> WorkflowRun
    where
        F: Fn(&WorkflowRun) -> bool,
    {
        let result = self
            .updates
            .wait_for(|run| predicate(run))
            .await
            .map(|run| run.clone());

        match result {
            Ok(run) => run,
            // Sender dropped: the last snapshot is final
            Err(_) => self.updates.borrow().clone(),
        }
    }

    /// Wait for a terminal status
    pub async fn wait(&mut self) -> WorkflowRun {
        self.wait_for(WorkflowRun::is_terminal).await
    }
}

/// Drives workflow runs from trigger to terminal status
#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    /// Produce a run's initial text from the workflow's trigger
    async fn resolve_trigger(&self, workflow: &WorkflowTemplate) -> Result<String, WorkflowError>;

    /// Validate the workflow and start a run in the background
    async fn start_workflow(
        &self,
        workflow: WorkflowTemplate,
        initial_prompt: String,
    ) -> Result<RunHandle, WorkflowError>;

    /// Resume or terminate a run paused on a human step
    async fn submit_decision(&self, decision: HumanDecision) -> Result<(), WorkflowError>;

    /// Request cancellation of an active run
    async fn cancel(&self, run_id: &RunId) -> Result<(), WorkflowError>;

    /// Latest snapshot of an active or retained run
    async fn snapshot(&self, run_id: &RunId) -> Option<WorkflowRun>;

    /// Subscribe to lifecycle events of every run
    fn subscribe(&self) -> broadcast::Receiver<RunEvent>;
}
