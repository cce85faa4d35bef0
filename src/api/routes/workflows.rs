//! Workflow definition endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::domain::workflow::ValidationOutcome;
use crate::domain::{RunId, RunStatus, WorkflowTemplate};

#[derive(Debug, Clone, Serialize)]
pub struct ListWorkflowsResponse {
    pub workflows: Vec<WorkflowTemplate>,
    pub total: usize,
}

/// Body of `POST /workflows/{id}/runs`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    /// Overrides the workflow's trigger
    #[serde(default)]
    pub initial_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStartedResponse {
    pub run_id: RunId,
    pub status: RunStatus,
}

/// GET /api/workflows
pub async fn list_workflows(
    State(state): State<AppState>,
) -> Result<Json<ListWorkflowsResponse>, ApiError> {
    let workflows = state.workflow_service.load_workflows().await?;
    let total = workflows.len();

    Ok(Json(ListWorkflowsResponse { workflows, total }))
}

/// POST /api/workflows
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(document): Json<Value>,
) -> Result<(StatusCode, Json<WorkflowTemplate>), ApiError> {
    let workflow = state.workflow_service.create(&document).await?;
    debug!(workflow_id = %workflow.id(), "Workflow created");

    Ok((StatusCode::CREATED, Json(workflow)))
}

/// GET /api/workflows/{workflow_id}
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<WorkflowTemplate>, ApiError> {
    Ok(Json(state.workflow_service.get_required(&workflow_id).await?))
}

/// PUT /api/workflows/{workflow_id}
pub async fn update_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(document): Json<Value>,
) -> Result<Json<WorkflowTemplate>, ApiError> {
    Ok(Json(state.workflow_service.update(&workflow_id, &document).await?))
}

/// DELETE /api/workflows/{workflow_id}
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.workflow_service.delete_workflow(&workflow_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("Workflow '{}' not found", workflow_id)))
    }
}

/// POST /api/workflows/validate
///
/// Always 200; the outcome says whether the document is valid.
pub async fn validate_workflow(
    State(state): State<AppState>,
    Json(document): Json<Value>,
) -> Json<ValidationOutcome> {
    Json(state.workflow_service.validate(&document))
}

/// POST /api/workflows/import
pub async fn import_workflow(
    State(state): State<AppState>,
    Json(document): Json<Value>,
) -> Result<Json<WorkflowTemplate>, ApiError> {
    Ok(Json(state.workflow_service.import(&document).await?))
}

/// POST /api/workflows/{workflow_id}/runs
pub async fn start_run(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(request): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<RunStartedResponse>), ApiError> {
    let handle = state
        .workflow_service
        .start_run(&workflow_id, request.initial_prompt)
        .await?;

    let response = RunStartedResponse {
        run_id: handle.run_id().clone(),
        status: handle.snapshot().status,
    };

    Ok((StatusCode::ACCEPTED, Json(response)))
}
