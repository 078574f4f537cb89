//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use scribe_ai::{create_analyzer, create_transcriber, AiConfig};
use scribe_api::{create_router, metrics, ApiConfig, AppState};
use scribe_queue::JobQueue;
use scribe_storage::{create_blob_store, BlobStoreConfig};
use scribe_store::{create_job_store, JobStoreConfig};
use scribe_worker::{Dispatcher, ExecutionMode, JobLifecycleManager, LifecycleConfig, Watchdog};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider was already installed");
    }

    init_tracing();

    info!("Starting scribe-api");

    if let Err(e) = run().await {
        error!("API server error: {:#}", e);
        std::process::exit(1);
    }

    info!("Server shutdown complete");
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,scribe_api=info,scribe_worker=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ApiConfig::from_env();
    let lifecycle = LifecycleConfig::from_env();
    info!(
        "API config: host={}, port={}, mode={}",
        config.host,
        config.port,
        lifecycle.mode.as_str()
    );

    let metrics_enabled = std::env::var("METRICS_ENABLED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(true);

    let metrics_handle = if metrics_enabled {
        match metrics::init_metrics() {
            Ok(handle) => {
                info!("Prometheus metrics enabled at /metrics");
                Some(handle)
            }
            Err(e) => {
                warn!("Prometheus recorder not installed: {}", e);
                None
            }
        }
    } else {
        None
    };

    let store = create_job_store(&JobStoreConfig::from_env()?)?;
    let blobs = create_blob_store(&BlobStoreConfig::from_env()?).await?;
    let ai_config = AiConfig::from_env();
    let transcriber = create_transcriber(&ai_config)?;
    let analyzer = create_analyzer(&ai_config)?;

    let queue = match lifecycle.mode {
        ExecutionMode::Direct => None,
        ExecutionMode::Queued => Some(Arc::new(JobQueue::from_env()?)),
    };
    let dispatcher = match &queue {
        Some(queue) => Dispatcher::Queue(queue.clone()),
        None => Dispatcher::Local,
    };

    let manager = JobLifecycleManager::new(lifecycle, store, blobs, transcriber, analyzer, dispatcher);

    // Workers own recovery in queued mode; here only direct mode needs it
    let watchdog_shutdown = CancellationToken::new();
    let watchdog_task = if manager.config().mode == ExecutionMode::Direct {
        match manager.resume_queued().await {
            Ok(0) => {}
            Ok(count) => info!("Resumed {} queued jobs from a previous run", count),
            Err(e) => warn!("Failed to resume queued jobs: {}", e),
        }

        let watchdog = Watchdog::new(manager.clone());
        let token = watchdog_shutdown.clone();
        Some(tokio::spawn(async move { watchdog.run(token).await }))
    } else {
        None
    };

    let mut state = AppState::new(config.clone(), manager.clone());
    if let Some(queue) = queue {
        state = state.with_queue(queue);
    }

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address()))?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    watchdog_shutdown.cancel();
    if let Some(task) = watchdog_task {
        let _ = task.await;
    }
    manager.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
