//! Health check endpoint.
//!
//! Always 200 while the process serves requests; the body reports which
//! optional services are configured and the usage queue backlog.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::services::entity_usage::USAGE_QUEUE;
use crate::state::AppState;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    collaboration_tokens: bool,
    usage_queue: u64,
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let usage_queue = state.queue().len(USAGE_QUEUE).await.unwrap_or(0);

    Json(HealthResponse {
        status: "healthy",
        collaboration_tokens: state.tokens().is_some(),
        usage_queue,
    })
}

/// Create the health check router.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
