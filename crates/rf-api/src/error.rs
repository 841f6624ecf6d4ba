//! Error types for rf-api

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// rf-api error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("{0}")]
    Core(#[from] rf_core::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::DocumentNotFound(_) | Self::RunNotFound(_) => StatusCode::NOT_FOUND,
            Self::Core(rf_core::Error::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            Self::Core(rf_core::Error::DocumentNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Core(rf_core::Error::WorkerUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Result type alias for rf-api
pub type Result<T> = std::result::Result<T, ApiError>;
