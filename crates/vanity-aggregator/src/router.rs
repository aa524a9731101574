//! Application router.

use crate::handlers::{health, submit_score};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Creates the aggregator router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(submit_score))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
