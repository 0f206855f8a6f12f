// taskq server binary
// Decision: Queue shutdown runs after the HTTP listener drains, so every
// accepted task is finalized before exit

use std::sync::Arc;

use anyhow::{Context, Result};
use taskq_core::telemetry::{init_telemetry, TelemetryConfig};
use taskq_queue::{InMemoryTaskStore, SqliteTaskStore, TaskQueue, TaskStore};
use taskq_server::{build_app, Config, StoreBackend};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - RUST_LOG / LOG_LEVEL: log filter
    // - LOG_FORMAT=json: structured output
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.service_name == "taskq" {
        telemetry_config.service_name = "taskq-server".to_string();
    }
    telemetry_config.service_version = Some(env!("CARGO_PKG_VERSION").to_string());
    init_telemetry(telemetry_config);

    let config = Config::from_env().context("Invalid configuration")?;

    let store: Arc<dyn TaskStore> = match &config.store {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory task store; task history is lost on restart");
            Arc::new(InMemoryTaskStore::new())
        }
        StoreBackend::Sqlite(url) => {
            let store = SqliteTaskStore::connect(url)
                .await
                .with_context(|| format!("Failed to open task database {url}"))?;
            tracing::info!(url = %url, "Connected to task database");
            Arc::new(store)
        }
    };

    let queue = Arc::new(
        TaskQueue::new(store, config.queue_config()).context("Failed to start task queue")?,
    );
    tracing::info!(workers = config.num_workers, "Worker pool started");

    let mut failures = queue.subscribe_failures();
    tokio::spawn(async move {
        loop {
            match failures.recv().await {
                Ok(failure) => {
                    tracing::error!(task_id = %failure.task_id(), failure = ?failure, "Background failure")
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Background failure log lagged")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let app = build_app(queue.clone(), &config.cors_allowed_origins);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("HTTP server stopped, draining task queue");
    queue
        .shutdown()
        .await
        .context("Failed to shut down task queue")?;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
