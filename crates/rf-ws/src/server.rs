//! WebSocket router and standalone server

use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

use rf_core::{BroadcastHub, WsConfig};

use crate::handler::websocket_handler;
use crate::Result;

/// Path of the progress stream
pub const PROGRESS_PATH: &str = "/api/ws/progress";

/// Shortest keepalive period a connection will use
pub const MIN_KEEPALIVE: Duration = Duration::from_secs(1);

/// Shared WebSocket state
pub struct WsState {
    pub hub: Arc<BroadcastHub>,
    /// Idle keepalive interval
    pub keepalive: Duration,
}

impl WsState {
    pub fn new(hub: Arc<BroadcastHub>, config: &WsConfig) -> Self {
        Self {
            hub,
            keepalive: config.keepalive_interval(),
        }
    }

    /// Keepalive period, never zero
    pub fn keepalive_period(&self) -> Duration {
        self.keepalive.max(MIN_KEEPALIVE)
    }
}

/// Router exposing the progress stream, ready to merge into an app
pub fn router(state: Arc<WsState>) -> Router {
    Router::new()
        .route(PROGRESS_PATH, get(websocket_handler))
        .with_state(state)
}

/// Serve only the progress stream on an already-bound listener
pub async fn serve(listener: TcpListener, state: Arc<WsState>) -> Result<()> {
    info!(
        "WebSocket server listening on {}{}",
        listener.local_addr()?,
        PROGRESS_PATH
    );
    axum::serve(listener, router(state)).await?;
    Ok(())
}
