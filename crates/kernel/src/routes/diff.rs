//! Document diff endpoint.

use anyhow::Context;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::content::diff::{Change, join_snippets};
use crate::error::AppResult;
use crate::state::AppState;

/// Upper bound for requested context words.
const MAX_CONTEXT_WORDS: usize = 50;

/// Create the diff router.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/diff", post(diff_documents))
}

#[derive(Debug, Deserialize)]
pub struct DiffRequest {
    pub old: String,
    pub new: String,
    pub context_words: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DiffResponse {
    pub has_changes: bool,
    pub html: String,
    pub added_content: Vec<String>,
    pub changes: Vec<Change>,
    pub context: String,
}

async fn diff_documents(
    State(state): State<AppState>,
    Json(request): Json<DiffRequest>,
) -> AppResult<Json<DiffResponse>> {
    let words = request
        .context_words
        .unwrap_or(state.diff_context_words())
        .min(MAX_CONTEXT_WORDS);

    let differ = *state.differ();
    let separator = state.diff_snippet_separator().to_string();
    let response = tokio::task::spawn_blocking(move || {
        let result = differ.diff(&request.old, &request.new);
        let snippets = result.context_snippets(words);
        DiffResponse {
            has_changes: result.has_changes(),
            html: result.html().to_string(),
            added_content: result.added_content().into_iter().map(str::to_string).collect(),
            changes: result.changes().to_vec(),
            context: join_snippets(&snippets, &separator),
        }
    })
    .await
    .context("diff task failed")?;
    state.metrics().record_diff();

    Ok(Json(response))
}
