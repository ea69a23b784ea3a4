//! Cron route handlers.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::info;

use crate::cron::{CronResult, LastCronRun};
use crate::error::{AppError, AppResult};
use crate::services::entity_usage::USAGE_QUEUE;
use crate::state::AppState;

/// Create the cron router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cron/{key}", post(run_cron))
        .route("/cron/status", get(cron_status))
}

/// Run cron tasks (protected by `CRON_KEY`).
async fn run_cron(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<(StatusCode, Json<CronResult>)> {
    // Without a configured key the trigger does not exist
    let Some(expected) = state.cron_key() else {
        return Err(AppError::NotFound);
    };
    if !bool::from(key.as_bytes().ct_eq(expected.as_bytes())) {
        info!("invalid cron key");
        return Err(AppError::Forbidden);
    }

    info!("cron triggered via HTTP");
    let result = state.cron().run().await;
    let status = match result {
        CronResult::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    Ok((status, Json(result)))
}

/// Cron status response.
#[derive(Debug, Serialize)]
pub struct CronStatusResponse {
    pub last_run: Option<LastCronRun>,
    pub usage_queue: u64,
}

async fn cron_status(State(state): State<AppState>) -> AppResult<Json<CronStatusResponse>> {
    let usage_queue = state.queue().len(USAGE_QUEUE).await?;

    Ok(Json(CronStatusResponse {
        last_run: state.cron().last_run(),
        usage_queue,
    }))
}
