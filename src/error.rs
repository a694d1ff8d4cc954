use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde_json::json;

use crate::{credentials::CredentialError, repository::RepositoryError};

pub type AppResult<T> = Result<T, AppError>;

/// AppError
///
/// Every way a request can end other than success or a validation re-render.
/// The access-control variants are soft redirects except `Forbidden`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("admin role required")]
    Forbidden,
    #[error("not permitted to act on this account")]
    NotPermitted,
    #[error("user not found")]
    NotFound,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error("session token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

fn error_body(status: StatusCode, message: &str) -> Response {
    let body = Json(json!({
        "error": {
            "message": message,
            "status": status.as_u16(),
        }
    }));
    (status, body).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Unauthenticated => Redirect::to("/login").into_response(),
            AppError::NotPermitted => Redirect::to("/").into_response(),
            AppError::Forbidden => error_body(StatusCode::FORBIDDEN, "Forbidden"),
            AppError::NotFound => error_body(StatusCode::NOT_FOUND, "Not Found"),
            AppError::Repository(_) | AppError::Credentials(_) | AppError::Token(_) => {
                // Details stay in the logs.
                tracing::error!(error = %self, "request failed");
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}
