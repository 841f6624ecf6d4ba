//! rf-api: HTTP API for Research Flow
//!
//! Run submission (asynchronous and blocking), run lookup, status, and
//! health endpoints. Built with axum; the progress WebSocket from `rf-ws`
//! is mounted on the same router.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

pub use error::{ApiError, Result};
pub use server::{app, start_server, AppState};
