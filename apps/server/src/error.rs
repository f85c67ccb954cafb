//! HTTP error envelope.
//!
//! Every failed request serializes as `{error: "CODE", message?: "..."}`.
//! Dependency conditions the client is expected to retry on are returned
//! with a 200 status by the handlers themselves; this type covers the rest.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use recordroute_history::HistoryError;
use recordroute_storage::StorageError;
use recordroute_vector::VectorError;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("upload exceeds the configured size limit")]
    PayloadTooLarge,
    #[error("{0}")]
    UpgradeRequired(String),
    #[error("{0}")]
    DimensionMismatch(String),
    #[error("{0}")]
    Internal(String),
}

/// Wire form of an error.
#[derive(Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UpgradeRequired(_)
            | AppError::DimensionMismatch(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "FILE_NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::PayloadTooLarge => "UPLOAD_TOO_LARGE",
            AppError::UpgradeRequired(_) => "UPGRADE_REQUIRED",
            AppError::DimensionMismatch(_) => "DIMENSION_MISMATCH",
            AppError::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.code(),
            message: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

impl From<HistoryError> for AppError {
    fn from(e: HistoryError) -> Self {
        match e {
            HistoryError::NotFound(id) => AppError::NotFound(format!("record not found: {id}")),
            HistoryError::UpgradeRequired(_) => AppError::UpgradeRequired(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<VectorError> for AppError {
    fn from(e: VectorError) -> Self {
        match e {
            VectorError::NotFound(id) => AppError::NotFound(format!("no vectors for record: {id}")),
            VectorError::DimensionMismatch { .. } => AppError::DimensionMismatch(e.to_string()),
            VectorError::UpgradeRequired(_) => AppError::UpgradeRequired(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidArtifact(id) => {
                AppError::NotFound(format!("unknown artifact: {id}"))
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::PayloadTooLarge.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            AppError::DimensionMismatch("d".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_history_not_found_maps_to_404() {
        let err: AppError = HistoryError::NotFound("r1".to_string()).into();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
