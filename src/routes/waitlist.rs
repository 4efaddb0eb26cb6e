use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::AppState;
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct WaitlistBody {
    pub name: String,
    pub mail: String,
}

pub async fn join_waitlist(
    State(state): State<AppState>,
    body: Result<Json<WaitlistBody>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let Json(body) = body.map_err(|rejection| AppError::Validation(rejection.body_text()))?;

    let name = body.name.trim();
    let mail = body.mail.trim();
    if name.is_empty() || mail.is_empty() {
        return Err(AppError::Validation("name and mail are required".into()));
    }

    state.waitlist.append(name, mail).await?;
    Ok((StatusCode::CREATED, Json(json!({ "message": "Saved" }))))
}
