//! Live stage and build result endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use stagekeeper_core::models::BuildResult;

use crate::api::status::AppError;
use crate::AppState;

#[derive(Serialize)]
struct StagesResponse {
    stages: Vec<String>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/stages", get(list_stages))
        .route("/api/stages/:stage/results", get(stage_results))
}

async fn list_stages(State(state): State<Arc<AppState>>) -> Result<Json<StagesResponse>, AppError> {
    let stages = state.orchestrator.stages().await?;
    Ok(Json(StagesResponse { stages }))
}

/// Results recorded for a stage, oldest first. A stage that never ran (or
/// whose results were purged) yields an empty list.
async fn stage_results(
    State(state): State<Arc<AppState>>,
    Path(stage): Path<String>,
) -> Result<Json<Vec<BuildResult>>, AppError> {
    let results = state.db.get_results(&stage)?;
    Ok(Json(results))
}
