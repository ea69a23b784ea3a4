//! Text format filtering endpoint.

use anyhow::Context;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::content::collab_markup::contains_collaboration_markup;
use crate::content::filter::FORMATS;
use crate::error::AppResult;
use crate::state::AppState;

/// Create the filter router.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/filter", post(filter_html))
}

#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    pub html: String,
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FilterResponse {
    pub html: String,
    /// Format actually applied; unknown formats fall back to `plain_text`.
    pub format: String,
}

async fn filter_html(
    State(state): State<AppState>,
    Json(request): Json<FilterRequest>,
) -> AppResult<Json<FilterResponse>> {
    let format = request
        .format
        .as_deref()
        .filter(|f| FORMATS.contains(f))
        .unwrap_or("plain_text")
        .to_string();

    // Filtering is CPU-bound and input size is caller controlled
    let pipeline = state.pipeline(&format);
    let input = request.html;
    let (html, had_markup) = tokio::task::spawn_blocking(move || {
        let had_markup = contains_collaboration_markup(&input);
        (pipeline.process(&input), had_markup)
    })
    .await
    .context("filter task failed")?;
    state.metrics().record_filter(&format, had_markup);

    Ok(Json(FilterResponse { html, format }))
}
