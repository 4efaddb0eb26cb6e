use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::Deserialize;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::pipeline::PipelineResult;

#[derive(Debug, Deserialize)]
pub struct AnalyzeBody {
    pub query: String,
}

/// Pipeline failures are part of the result envelope and still return 200.
pub async fn analyze(
    State(state): State<AppState>,
    body: Result<Json<AnalyzeBody>, JsonRejection>,
) -> AppResult<Json<PipelineResult>> {
    let Json(body) = body.map_err(|rejection| AppError::Validation(rejection.body_text()))?;

    tracing::info!(query.chars = body.query.chars().count(), "analyze request");
    Ok(Json(state.reasoner.reason(&body.query).await))
}
