//! Collaboration token endpoint.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::services::collaboration_token::{CollaborationRole, CollaborationUser};
use crate::state::AppState;

/// Create the collaboration router.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/collaboration/token", post(issue_token))
}

/// Token request.
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub user_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
    /// One of `reader`, `commentator`, `writer`; defaults to the configured role.
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub environment_id: String,
    pub role: CollaborationRole,
}

async fn issue_token(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> AppResult<Json<TokenResponse>> {
    let Some(tokens) = state.tokens() else {
        return Err(AppError::ServiceUnavailable(
            "collaboration service is not configured".to_string(),
        ));
    };

    let role = request
        .role
        .as_deref()
        .map(str::parse::<CollaborationRole>)
        .transpose()?;

    let mut user = CollaborationUser::new(request.user_id);
    if let Some(name) = request.name {
        user = user.with_name(name);
    }
    if let Some(email) = request.email {
        user = user.with_email(email);
    }
    if let Some(avatar) = request.avatar {
        user = user.with_avatar(avatar);
    }

    let token = tokens.issue(&user, role)?;
    state.metrics().record_token();

    Ok(Json(TokenResponse {
        token,
        environment_id: tokens.environment_id().to_string(),
        role: role.unwrap_or(tokens.default_role()),
    }))
}
