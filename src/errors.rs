use crate::{models::options::ValidationError, services::storage::StorageError};
use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

/// Everything the gateway can answer besides success.
///
/// Bodies are short fixed strings; internal detail is logged, never returned.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("Forbidden")]
    Forbidden,
    #[error("File too large/small")]
    SizeMismatch,
    #[error("Mismatch sha256")]
    ChecksumMismatch,
    #[error("{0}")]
    NotFound(&'static str),
    #[error("Method Not Allowed")]
    MethodNotAllowed,
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::ChecksumMismatch => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::SizeMismatch => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match &self {
            AppError::Internal(detail) => {
                error!("request failed: {}", detail);
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/html")],
            body,
        )
            .into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Validation(err) => AppError::Validation(err),
            StorageError::ObjectNotFound(_) => AppError::NotFound("404 Not Found"),
            StorageError::TooLarge { .. } => AppError::SizeMismatch,
            other => AppError::Internal(other.to_string()),
        }
    }
}
