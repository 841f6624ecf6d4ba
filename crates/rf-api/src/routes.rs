//! Route definitions
//!
//! Defines all HTTP API endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{
    get_run, health, list_runs, research_status, root, send_research, send_research_blocking,
};
use crate::server::AppState;

/// Create the API router
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        // Health check
        .route("/health", get(health))
        // Research runs
        .route("/api/v1/research/send", post(send_research))
        .route(
            "/api/v1/research/send-with-documents",
            post(send_research_blocking),
        )
        .route("/api/v1/research/status", get(research_status))
        .route("/api/v1/research/runs", get(list_runs))
        .route("/api/v1/research/runs/{run_id}", get(get_run))
}
