//! Run lifecycle events and the broadcast bus that carries them
//!
//! Publishing with no active subscribers is a no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::run::RunId;

/// Default channel capacity for the event bus
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunEventKind {
    Started,
    Succeeded,
    Failed,
    Paused,
    Resumed,
}

/// Lifecycle event. Events without a `step_id` describe the run itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    pub run_id: RunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub kind: RunEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl RunEvent {
    pub fn run(run_id: RunId, kind: RunEventKind) -> Self {
        Self {
            run_id,
            step_id: None,
            kind,
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn step(run_id: RunId, step_id: impl Into<String>, kind: RunEventKind) -> Self {
        Self {
            step_id: Some(step_id.into()),
            ..Self::run(run_id, kind)
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Multi-consumer bus for run events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        let run_id = RunId::generate();

        bus.publish(RunEvent::step(run_id.clone(), "s1", RunEventKind::Started));

        assert_eq!(first.recv().await.unwrap().step_id.as_deref(), Some("s1"));
        assert_eq!(second.recv().await.unwrap().run_id, run_id);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.publish(RunEvent::run(RunId::generate(), RunEventKind::Started));
    }

    #[test]
    fn test_event_wire_shape() {
        let event = RunEvent::run(RunId::generate(), RunEventKind::Failed).with_detail("boom");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["kind"], "failed");
        assert_eq!(value["detail"], "boom");
        assert!(value.get("stepId").is_none());
        assert!(value.get("runId").is_some());
    }
}
