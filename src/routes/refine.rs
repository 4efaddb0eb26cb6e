use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::{AppError, AppResult};

#[derive(Debug, Serialize, Deserialize)]
pub struct RefineBody {
    #[serde(rename = "Text")]
    pub text: String,
}

pub async fn refine(
    State(state): State<AppState>,
    body: Result<Json<RefineBody>, JsonRejection>,
) -> AppResult<Json<RefineBody>> {
    let Json(body) = body.map_err(|rejection| AppError::Validation(rejection.body_text()))?;
    if body.text.trim().is_empty() {
        return Err(AppError::Validation("Text must not be empty".into()));
    }

    let text = state.refiner.refine(&body.text).await?;
    Ok(Json(RefineBody { text }))
}
