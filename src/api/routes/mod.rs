//! JSON endpoints consumed by the workflow UI

pub mod prompts;
pub mod runs;
pub mod workflows;

use axum::{
    routing::{get, post},
    Router,
};

use super::state::AppState;

/// Routes mounted under `/api`
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        // Workflow definitions
        .route(
            "/workflows",
            get(workflows::list_workflows).post(workflows::create_workflow),
        )
        .route("/workflows/validate", post(workflows::validate_workflow))
        .route("/workflows/import", post(workflows::import_workflow))
        .route(
            "/workflows/{workflow_id}",
            get(workflows::get_workflow)
                .put(workflows::update_workflow)
                .delete(workflows::delete_workflow),
        )
        .route("/workflows/{workflow_id}/runs", post(workflows::start_run))
        // Runs
        .route("/runs/{run_id}", get(runs::get_run))
        .route("/runs/{run_id}/events", get(runs::run_events))
        .route("/runs/{run_id}/decision", post(runs::submit_decision))
        .route("/runs/{run_id}/cancel", post(runs::cancel_run))
        .route("/runs/{run_id}/query", post(runs::query_run))
        // Prompt templates
        .route(
            "/prompts",
            get(prompts::list_prompts).post(prompts::create_prompt),
        )
        .route(
            "/prompts/{prompt_id}",
            get(prompts::get_prompt)
                .put(prompts::update_prompt)
                .delete(prompts::delete_prompt),
        )
        .route("/prompts/{prompt_id}/compile", post(prompts::compile_prompt))
}
