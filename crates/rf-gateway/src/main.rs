//! research-flow: Research Flow server binary
//!
//! Usage:
//!   research-flow            - Start the HTTP API + progress WebSocket
//!   research-flow --help     - Show help
//!   research-flow --version  - Show version

use rf_api::AppState;
use rf_core::{BroadcastHub, Config, LlmInvoker, ResearchFlow, RunRegistry, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

/// How long in-flight runs get to finish on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Run mode
enum RunMode {
    Server,
    Help,
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match parse_args() {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("research-flow {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        RunMode::Server => {}
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load .env file
    dotenvy::dotenv().ok();

    let config = Config::load().map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    tracing::info!("Starting research-flow...");
    tracing::info!(
        "Model: {} ({:?}), workers: {}, max attempts: {}",
        config.llm.model,
        config.llm.provider,
        config.workflow.workers,
        config.workflow.max_attempts
    );
    if !config.llm.is_configured() {
        tracing::warn!("LLM_API_KEY is not set; runs will fail until it is configured");
    }

    run_server(config).await
}

/// Parse command line arguments
fn parse_args() -> RunMode {
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => return RunMode::Help,
            "--version" | "-v" => return RunMode::Version,
            _ => {}
        }
    }
    RunMode::Server
}

/// Print help message
fn print_help() {
    println!("research-flow - research, review and synthesis workflow service");
    println!();
    println!("Usage:");
    println!("  research-flow            Start the HTTP API and progress WebSocket");
    println!("  research-flow --help     Show this help message");
    println!("  research-flow --version  Show version");
    println!();
    println!("Configuration is read from research-flow.toml when present,");
    println!("then overridden by environment variables:");
    println!("  LLM_API_KEY                   API key (required for runs)");
    println!("  LLM_MODEL                     Model name (default: claude-sonnet-4-20250514)");
    println!("  LLM_PROVIDER                  claude or openai (default: claude)");
    println!("  LLM_BASE_URL                  Custom API endpoint");
    println!("  SERVER_HOST / SERVER_PORT     Bind address (default: 0.0.0.0:8000)");
    println!("  ALLOWED_ORIGINS               Comma-separated CORS origins");
    println!("  WORKFLOW_MAX_ATTEMPTS         Review rounds before failing (default: 3)");
    println!("  WORKFLOW_RETRY_DELAY_SECS     Delay before a retry (default: 10)");
    println!("  WORKFLOW_QUOTA_COOLDOWN_SECS  Wait after a quota error (default: 60)");
    println!("  WORKFLOW_WORKERS              Concurrent runs (default: 4)");
    println!("  WORKFLOW_RUN_RETENTION        Finished runs kept for lookup (default: 1000)");
    println!("  OUTPUT_DIR / UPLOAD_DIR       Report and document directories");
    println!("  WS_KEEPALIVE_SECS             WebSocket keepalive, at least 1 (default: 30)");
}

/// Wire services, serve, and shut down cleanly on Ctrl+C
async fn run_server(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let hub = Arc::new(BroadcastHub::new());
    let invoker = Arc::new(
        LlmInvoker::from_config(&config.llm)
            .map_err(|e| anyhow::anyhow!("Failed to create LLM client: {}", e))?,
    );
    let flow = Arc::new(ResearchFlow::new(invoker, hub.clone(), &config.workflow));
    let registry = Arc::new(RunRegistry::with_retention(config.workflow.run_retention));
    let pool = Arc::new(WorkerPool::new(flow, registry, config.workflow.workers));

    let state = AppState::new(config.clone(), hub.clone(), pool.clone());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(rf_api::start_server(state, async {
        let _ = stop_rx.await;
    }));

    tracing::info!("research-flow initialized successfully");
    tracing::info!("Press Ctrl+C to exit");

    // The server only returns early on a bind or accept failure
    let finished_early = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Shutting down...");
            None
        }
        joined = &mut server => Some(joined),
    };

    pool.shutdown(SHUTDOWN_GRACE).await;
    hub.shutdown();
    let _ = stop_tx.send(());

    let joined = match finished_early {
        Some(joined) => joined,
        None => server.await,
    };
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!("HTTP server error: {}", e);
            return Err(e);
        }
        Err(e) => tracing::error!("HTTP server task failed: {}", e),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
