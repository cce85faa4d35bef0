//! Prompt template endpoints

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::domain::{CompiledPrompt, PromptKind, PromptTemplate, PromptVariable};
use crate::infrastructure::services::{CreatePromptRequest, UpdatePromptRequest};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListPromptsParams {
    #[serde(default)]
    pub kind: Option<PromptKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListPromptsResponse {
    pub prompts: Vec<PromptTemplate>,
    pub total: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePromptApiRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub kind: PromptKind,
    pub prompt: String,
    #[serde(default)]
    pub variables: Vec<PromptVariable>,
}

impl From<CreatePromptApiRequest> for CreatePromptRequest {
    fn from(req: CreatePromptApiRequest) -> Self {
        Self {
            id: req.id,
            name: req.name,
            description: req.description,
            kind: req.kind,
            prompt: req.prompt,
            variables: req.variables,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePromptApiRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub kind: Option<PromptKind>,
    pub prompt: Option<String>,
    pub variables: Option<Vec<PromptVariable>>,
}

impl From<UpdatePromptApiRequest> for UpdatePromptRequest {
    fn from(req: UpdatePromptApiRequest) -> Self {
        Self {
            name: req.name,
            description: req.description,
            kind: req.kind,
            prompt: req.prompt,
            variables: req.variables,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompilePromptRequest {
    #[serde(default)]
    pub values: HashMap<String, Value>,
}

/// GET /api/prompts
pub async fn list_prompts(
    State(state): State<AppState>,
    Query(params): Query<ListPromptsParams>,
) -> Result<Json<ListPromptsResponse>, ApiError> {
    let prompts = state.prompt_service.list(params.kind).await?;
    let total = prompts.len();

    Ok(Json(ListPromptsResponse { prompts, total }))
}

/// POST /api/prompts
pub async fn create_prompt(
    State(state): State<AppState>,
    Json(request): Json<CreatePromptApiRequest>,
) -> Result<(StatusCode, Json<PromptTemplate>), ApiError> {
    let prompt = state.prompt_service.create(request.into()).await?;
    Ok((StatusCode::CREATED, Json(prompt)))
}

/// GET /api/prompts/{prompt_id}
pub async fn get_prompt(
    State(state): State<AppState>,
    Path(prompt_id): Path<String>,
) -> Result<Json<PromptTemplate>, ApiError> {
    Ok(Json(state.prompt_service.get_required(&prompt_id).await?))
}

/// PUT /api/prompts/{prompt_id}
pub async fn update_prompt(
    State(state): State<AppState>,
    Path(prompt_id): Path<String>,
    Json(request): Json<UpdatePromptApiRequest>,
) -> Result<Json<PromptTemplate>, ApiError> {
    Ok(Json(
        state
            .prompt_service
            .update(&prompt_id, request.into())
            .await?,
    ))
}

/// DELETE /api/prompts/{prompt_id}
pub async fn delete_prompt(
    State(state): State<AppState>,
    Path(prompt_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.prompt_service.delete(&prompt_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("Prompt '{}' not found", prompt_id)))
    }
}

/// POST /api/prompts/{prompt_id}/compile
pub async fn compile_prompt(
    State(state): State<AppState>,
    Path(prompt_id): Path<String>,
    Json(request): Json<CompilePromptRequest>,
) -> Result<Json<CompiledPrompt>, ApiError> {
    Ok(Json(
        state
            .prompt_service
            .compile(&prompt_id, &request.values)
            .await?,
    ))
}
