//! HTTP API handlers
//!
//! Research submission, run lookup, and service status.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use rf_core::{RunId, RunOutcome, RunRequest, RunSummary};

use crate::error::{ApiError, Result};
use crate::server::AppState;

const MIN_TOPIC_CHARS: usize = 3;
const QUOTA_MESSAGE: &str = "API quota exceeded. Please retry in 1-2 minutes.";

// ============================================================================
// Request/Response types
// ============================================================================

/// Research request payload
#[derive(Debug, Deserialize)]
pub struct ResearchRequest {
    pub topic: String,
    /// Ids of previously uploaded documents
    #[serde(default)]
    pub document_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchStatus {
    Pending,
    Completed,
    Failed,
}

/// Research response payload
#[derive(Debug, Serialize, Deserialize)]
pub struct ResearchResponse {
    pub status: ResearchStatus,
    pub topic: String,
    pub result: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Observer statistics
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub active_connections: usize,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthServices {
    pub api: bool,
    pub llm: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub live: bool,
    pub observers: usize,
    pub services: HealthServices,
}

fn validate_topic(topic: &str) -> Result<String> {
    let topic = topic.trim();
    if topic.chars().count() < MIN_TOPIC_CHARS {
        return Err(ApiError::InvalidRequest(format!(
            "topic must be at least {} characters",
            MIN_TOPIC_CHARS
        )));
    }
    Ok(topic.to_string())
}

/// Validate and resolve a request into a run request. Nothing is started.
async fn prepare(state: &AppState, req: ResearchRequest) -> Result<RunRequest> {
    let topic = validate_topic(&req.topic)?;
    let documents = state
        .documents
        .resolve(&req.document_ids)
        .await
        .map_err(|e| match e {
            rf_core::Error::DocumentNotFound(id) => ApiError::DocumentNotFound(id),
            other => ApiError::Core(other),
        })?;
    Ok(RunRequest::new(topic).with_documents(documents))
}

// ============================================================================
// Handler functions
// ============================================================================

/// Service directory
pub async fn root() -> Json<Value> {
    Json(json!({
        "name": "Research Flow",
        "version": env!("CARGO_PKG_VERSION"),
        "health": "/health",
        "websocket": rf_ws::PROGRESS_PATH,
        "research": "/api/v1/research/send",
    }))
}

/// Liveness probe
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let services = HealthServices {
        api: true,
        llm: state.config.llm.is_configured(),
    };
    let healthy = services.api && services.llm;
    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        live: !state.pool.is_closed(),
        observers: state.hub.observer_count(),
        services,
    })
}

/// Start a run in the background and acknowledge immediately
pub async fn send_research(
    State(state): State<AppState>,
    Json(req): Json<ResearchRequest>,
) -> Result<Json<ResearchResponse>> {
    let request = prepare(&state, req).await?;
    let topic = request.topic.clone();
    let handle = state.pool.submit(request)?;
    info!("Research run {} accepted: {}", handle.run_id(), topic);

    Ok(Json(ResearchResponse {
        status: ResearchStatus::Pending,
        topic,
        result: String::new(),
        message: "Research started. Connect to the WebSocket for real-time updates.".to_string(),
        run_id: Some(handle.run_id()),
        created_at: Some(handle.created_at()),
    }))
}

/// Run to completion and answer with the outcome
pub async fn send_research_blocking(
    State(state): State<AppState>,
    Json(req): Json<ResearchRequest>,
) -> Result<Json<ResearchResponse>> {
    let request = prepare(&state, req).await?;
    let topic = request.topic.clone();
    let handle = state.pool.submit(request)?;
    let run_id = handle.run_id();
    let created_at = handle.created_at();

    let response = |status, result: String, message: String| ResearchResponse {
        status,
        topic: topic.clone(),
        result,
        message,
        run_id: Some(run_id),
        created_at: Some(created_at),
    };

    match handle.wait().await {
        Ok(report) => {
            let iterations = report.state.retry_count;
            Ok(Json(match report.outcome {
                RunOutcome::Completed { report, .. } => response(
                    ResearchStatus::Completed,
                    report,
                    format!(
                        "Research '{}' completed after {} iteration(s)",
                        topic, iterations
                    ),
                ),
                RunOutcome::MaxRetryFailed { .. } => response(
                    ResearchStatus::Failed,
                    format!(
                        "Research failed after {} attempts.\n\nLast feedback:\n{}",
                        iterations,
                        report.state.feedback.as_deref().unwrap_or_default()
                    ),
                    format!("Research '{}' did not pass review", topic),
                ),
            }))
        }
        Err(e) if e.is_quota_exceeded() => {
            warn!("Run {} hit the API quota: {}", run_id, e);
            Ok(Json(response(
                ResearchStatus::Failed,
                String::new(),
                QUOTA_MESSAGE.to_string(),
            )))
        }
        Err(e) => Err(ApiError::Core(e)),
    }
}

/// Observer count
pub async fn research_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        active_connections: state.hub.observer_count(),
        status: "operational".to_string(),
    })
}

pub async fn list_runs(State(state): State<AppState>) -> Json<Vec<RunSummary>> {
    Json(state.pool.registry().list())
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunSummary>> {
    RunId::parse(&run_id)
        .and_then(|id| state.pool.registry().get(&id))
        .map(Json)
        .ok_or(ApiError::RunNotFound(run_id))
}
