//! Content entity endpoints.
//!
//! Saving or deleting content enqueues usage tracking; the usage registry
//! catches up on the next cron run.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::content_export::{SyncReport, export_content};
use crate::error::{AppError, AppResult};
use crate::models::ContentEntity;
use crate::services::entity_usage::{EntityRef, UsageRecord, UsageWorkItem};
use crate::state::AppState;

/// Create the content router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/content", put(save_content))
        .route(
            "/api/content/{entity_type}/{uuid}",
            get(load_content).delete(delete_content),
        )
        .route("/api/content/{entity_type}/{uuid}/usage", get(content_usage))
        .route("/api/content/export", post(export))
}

async fn save_content(
    State(state): State<AppState>,
    Json(mut entity): Json<ContentEntity>,
) -> AppResult<Json<ContentEntity>> {
    if entity.entity_type.trim().is_empty() || entity.bundle.trim().is_empty() {
        return Err(AppError::BadRequest(
            "entity_type and bundle are required".to_string(),
        ));
    }
    if entity.changed == 0 {
        entity.changed = chrono::Utc::now().timestamp();
    }

    state.storage().save(&entity).await?;
    state
        .usage_worker()
        .enqueue(&UsageWorkItem::update(&entity))
        .await?;

    Ok(Json(entity))
}

async fn load_content(
    State(state): State<AppState>,
    Path((entity_type, uuid)): Path<(String, Uuid)>,
) -> AppResult<Json<ContentEntity>> {
    state
        .storage()
        .load(&entity_type, uuid)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

async fn delete_content(
    State(state): State<AppState>,
    Path((entity_type, uuid)): Path<(String, Uuid)>,
) -> AppResult<StatusCode> {
    if !state.storage().delete(&entity_type, uuid).await? {
        return Err(AppError::NotFound);
    }
    state
        .usage_worker()
        .enqueue(&UsageWorkItem::delete(&entity_type, uuid))
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Usage rows in both directions.
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    /// Entities this entity references.
    pub targets: Vec<UsageRecord>,
    /// Entities referencing this entity.
    pub sources: Vec<UsageRecord>,
}

async fn content_usage(
    State(state): State<AppState>,
    Path((entity_type, uuid)): Path<(String, Uuid)>,
) -> AppResult<Json<UsageResponse>> {
    let entity = EntityRef::new(entity_type, uuid);
    let usage = state.usage_worker().usage();

    Ok(Json(UsageResponse {
        targets: usage.list_targets(&entity),
        sources: usage.list_sources(&entity),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub clean: bool,
}

async fn export(
    State(state): State<AppState>,
    request: Option<Json<ExportRequest>>,
) -> AppResult<Json<SyncReport>> {
    let clean = request.is_some_and(|Json(r)| r.clean);
    let dir = state.content_export_dir();

    info!(dir = %dir.display(), clean, "content export requested");
    let report = export_content(state.storage().as_ref(), dir, clean).await?;

    Ok(Json(report))
}
