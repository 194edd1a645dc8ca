//! Error taxonomy shared by the ingestion pipeline, the read services, and
//! the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("upstream feed returned an unexpected shape: {0}")]
    RemoteFormatError(String),

    #[error("downloaded archive is not a valid zip: {0}")]
    BadArchiveError(String),

    #[error("expected file missing from archive: {0}")]
    MissingFileError(String),

    #[error("store error: {0}")]
    StoreError(#[from] sqlx::Error),

    #[error("conflicting run already in progress: {0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RemoteFormatError(_)
            | AppError::BadArchiveError(_)
            | AppError::MissingFileError(_) => StatusCode::BAD_GATEWAY,
            AppError::StoreError(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = self.to_string();
        tracing::error!(%message, %status, "request failed");

        (
            status,
            Json(ErrorBody {
                status: "error",
                message,
            }),
        )
            .into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
