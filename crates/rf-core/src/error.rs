//! Error types for rf-core

use thiserror::Error;

/// Markers an agent backend puts in its failure text when a rate limit or
/// quota was hit.
const QUOTA_MARKERS: [&str; 2] = ["429", "RESOURCE_EXHAUSTED"];

/// Main error type for rf-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("API quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Agent invocation failed: {0}")]
    Agent(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Worker pool unavailable")]
    WorkerUnavailable,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this failure is a rate-limit/quota signal from an agent backend.
    pub fn is_quota_exceeded(&self) -> bool {
        if matches!(self, Self::QuotaExceeded(_)) {
            return true;
        }
        let text = self.to_string();
        QUOTA_MARKERS.iter().any(|marker| text.contains(marker))
    }
}

/// Result type alias for rf-core
pub type Result<T> = std::result::Result<T, Error>;
