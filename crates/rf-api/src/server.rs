//! HTTP API Server
//!
//! Builds the application router and serves it.

use axum::{http::HeaderValue, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use rf_core::{BroadcastHub, Config, DocumentStore, WorkerPool};
use rf_ws::WsState;

use crate::routes::routes;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Arc<BroadcastHub>,
    pub pool: Arc<WorkerPool>,
    pub documents: DocumentStore,
}

impl AppState {
    pub fn new(config: Arc<Config>, hub: Arc<BroadcastHub>, pool: Arc<WorkerPool>) -> Self {
        let documents = DocumentStore::new(&config.workflow.upload_dir);
        Self {
            config,
            hub,
            pool,
            documents,
        }
    }
}

fn cors_layer(allowed_origins: Option<&[String]>) -> CorsLayer {
    let Some(origins) = allowed_origins else {
        return CorsLayer::permissive();
    };

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Full application: HTTP routes plus the progress WebSocket
pub fn app(state: AppState) -> Router {
    let ws_state = Arc::new(WsState::new(state.hub.clone(), &state.config.ws));
    let cors = cors_layer(state.config.server.allowed_origins.as_deref());

    Router::new()
        .merge(routes().with_state(state))
        .merge(rf_ws::router(ws_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server; resolves when `shutdown` does
pub async fn start_server(
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.server.host, state.config.server.port)
        .parse()?;
    let app = app(state);

    info!("HTTP API listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, rf_ws::PROGRESS_PATH);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
