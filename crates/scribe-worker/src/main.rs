//! Transcription worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use scribe_ai::{create_analyzer, create_transcriber, AiConfig};
use scribe_queue::JobQueue;
use scribe_storage::{create_blob_store, BlobStoreConfig};
use scribe_store::{create_job_store, JobStoreConfig};
use scribe_worker::{
    Dispatcher, ExecutionMode, ExecutorConfig, JobExecutor, JobLifecycleManager, LifecycleConfig,
    Watchdog,
};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider was already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting scribe-worker");

    if let Err(e) = run().await {
        error!("Worker error: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,scribe_worker=info,scribe_ai=info"));

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
    let mut config = LifecycleConfig::from_env();
    if config.mode != ExecutionMode::Queued {
        warn!("EXECUTION_MODE is not 'queued'; the worker binary always consumes the queue");
        config = LifecycleConfig {
            mode: ExecutionMode::Queued,
            limits: scribe_worker::ExecutionLimits::for_mode(ExecutionMode::Queued),
            ..config
        };
    }
    info!("Lifecycle config: {:?}", config);

    if let Some(port) = std::env::var("WORKER_METRICS_PORT").ok().and_then(|s| s.parse::<u16>().ok()) {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!("Metrics exporter listening on {}", addr);
    }

    let store = create_job_store(&JobStoreConfig::from_env()?)?;
    let blobs = create_blob_store(&BlobStoreConfig::from_env()?).await?;
    let ai_config = AiConfig::from_env();
    let transcriber = create_transcriber(&ai_config)?;
    let analyzer = create_analyzer(&ai_config)?;
    let queue = Arc::new(JobQueue::from_env()?);

    let manager = JobLifecycleManager::new(
        config,
        store,
        blobs,
        transcriber,
        analyzer,
        Dispatcher::Queue(queue.clone()),
    );

    let watchdog = Watchdog::new(manager.clone());
    let watchdog_shutdown = manager.pool().shutdown_token();
    let watchdog_task = tokio::spawn(async move { watchdog.run(watchdog_shutdown).await });

    let executor = Arc::new(JobExecutor::new(manager, queue, ExecutorConfig::from_env()));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_executor.shutdown();
        }
    });

    executor.run().await?;
    watchdog_task.abort();
    Ok(())
}
