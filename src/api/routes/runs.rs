//! Run inspection and control endpoints

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::domain::workflow::{Decision, QueryResult};
use crate::domain::{HumanDecision, RunEvent, RunEventKind, RunId};
use crate::infrastructure::services::RunView;

const KEEP_ALIVE_SECS: u64 = 15;

/// Body of `POST /runs/{id}/decision`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub step_id: String,
    pub decision: Decision,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

/// GET /api/runs/{run_id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunView>, ApiError> {
    Ok(Json(state.workflow_service.get_run(&run_id).await?))
}

/// GET /api/runs/{run_id}/events
///
/// Sends the current view as a `snapshot` event, then the run's lifecycle
/// events. The stream ends once the run reaches a terminal status.
pub async fn run_events(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Subscribe first so nothing between the snapshot and the stream is lost
    let receiver = state.workflow_service.subscribe();
    let view = state.workflow_service.get_run(&run_id).await?;
    let finished = view.run.is_terminal();
    let run_id = view.run.run_id.clone();

    let snapshot = stream::once(async move { Ok(snapshot_event(&view)) });
    let live: BoxStream<'static, Result<Event, Infallible>> = if finished {
        stream::empty().boxed()
    } else {
        run_event_stream(receiver, run_id).boxed()
    };

    Ok(Sse::new(snapshot.chain(live))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(KEEP_ALIVE_SECS))))
}

/// POST /api/runs/{run_id}/decision
pub async fn submit_decision(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> Result<StatusCode, ApiError> {
    let decision = HumanDecision {
        run_id: RunId::parse(&run_id).map_err(|e| ApiError::bad_request(e.to_string()))?,
        step_id: request.step_id,
        decision: request.decision,
        data: request.data,
    };

    state.workflow_service.submit_decision(decision).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/runs/{run_id}/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.workflow_service.cancel_run(&run_id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/runs/{run_id}/query
pub async fn query_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResult>, ApiError> {
    Ok(Json(
        state
            .workflow_service
            .query_run(&run_id, &request.query)
            .await?,
    ))
}

fn snapshot_event(view: &RunView) -> Event {
    Event::default()
        .event("snapshot")
        .json_data(view)
        .unwrap_or_else(|_| Event::default().event("snapshot"))
}

fn lifecycle_event(event: &RunEvent) -> Option<Event> {
    let name = serde_json::to_value(event.kind).ok()?;

    Event::default()
        .event(name.as_str().unwrap_or("event"))
        .json_data(event)
        .ok()
}

/// Run-level success or failure closes the stream
fn is_final(event: &RunEvent) -> bool {
    event.step_id.is_none()
        && matches!(event.kind, RunEventKind::Succeeded | RunEventKind::Failed)
}

fn run_event_stream(
    receiver: broadcast::Receiver<RunEvent>,
    run_id: RunId,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let events = BroadcastStream::new(receiver);

    stream::unfold((events, false), move |(mut events, done)| {
        let run_id = run_id.clone();
        async move {
            if done {
                return None;
            }

            loop {
                match events.next().await? {
                    Ok(event) if event.run_id == run_id => {
                        let done = is_final(&event);
                        if let Some(sse) = lifecycle_event(&event) {
                            return Some((Ok(sse), (events, done)));
                        }
                        if done {
                            return None;
                        }
                    }
                    Ok(_) => {}
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(run_id = %run_id, skipped, "Event stream lagged");
                    }
                }
            }
        }
    })
    .chain(stream::once(async {
        debug!("Run event stream closed");
        Ok(Event::default().event("end").data("{}"))
    }))
}
