//! Error types for rf-ws

use thiserror::Error;

/// WebSocket error type
#[derive(Error, Debug)]
pub enum WsError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] rf_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<axum::Error> for WsError {
    fn from(e: axum::Error) -> Self {
        Self::WebSocket(e.to_string())
    }
}

/// Result type alias for rf-ws
pub type Result<T> = std::result::Result<T, WsError>;
