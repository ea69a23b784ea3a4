//! Application error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::services::collaboration_token::CollaborationTokenError;

/// Application errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("not found")]
    NotFound,

    #[error("forbidden")]
    Forbidden,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<CollaborationTokenError> for AppError {
    fn from(e: CollaborationTokenError) -> Self {
        match e {
            CollaborationTokenError::MissingEnvironmentId
            | CollaborationTokenError::MissingAccessKey => {
                AppError::ServiceUnavailable(e.to_string())
            }
            CollaborationTokenError::MissingUser | CollaborationTokenError::UnknownRole(_) => {
                AppError::BadRequest(e.to_string())
            }
            CollaborationTokenError::Encode(_) | CollaborationTokenError::Decode(_) => {
                AppError::Internal(e.into())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        // Internal details are logged, never returned
        let body = match &self {
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal server error");
                "internal server error".to_string()
            }
            _ => self.to_string(),
        };

        (status, body).into_response()
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;
