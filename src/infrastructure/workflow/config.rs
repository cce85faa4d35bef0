use serde::Deserialize;

use crate::domain::workflow::DEFAULT_EVENT_CAPACITY;

/// What happens when a human step waits longer than `human_timeout_secs`
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HumanTimeoutAction {
    #[default]
    Reject,
    Approve,
}

/// Configuration for the workflow executor
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Limit for a single model, tool or function invocation
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,

    /// Human steps wait forever unless set
    #[serde(default)]
    pub human_timeout_secs: Option<u64>,

    #[serde(default)]
    pub human_timeout_action: HumanTimeoutAction,

    /// Reject a second concurrent run of the same workflow
    #[serde(default)]
    pub single_run_per_workflow: bool,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_step_timeout_ms() -> u64 {
    300_000
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: default_step_timeout_ms(),
            human_timeout_secs: None,
            human_timeout_action: HumanTimeoutAction::default(),
            single_run_per_workflow: false,
            event_capacity: default_event_capacity(),
        }
    }
}
