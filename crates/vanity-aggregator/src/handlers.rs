//! HTTP handlers.

use crate::error::AppError;
use crate::extractors::ValidatedJson;
use crate::score::ScoreReport;
use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use tracing::info;

/// Response to a score submission.
#[derive(Debug, Serialize)]
pub struct ScoreResponse {
    pub new_highest: bool,
    pub highest: f64,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub highest: f64,
}

/// `POST /`: submit a scored address.
pub async fn submit_score(
    State(state): State<AppState>,
    ValidatedJson(report): ValidatedJson<ScoreReport>,
) -> Result<Json<ScoreResponse>, AppError> {
    info!(score = report.score, address = %report.address, "Score received");
    let submission = state.board.submit(&report).await?;
    Ok(Json(ScoreResponse {
        new_highest: submission.new_highest,
        highest: submission.highest,
    }))
}

/// `GET /health`.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        highest: state.board.highest(),
    })
}
