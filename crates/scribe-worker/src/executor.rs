//! Queue consumer for worker processes.

use std::sync::Arc;
use std::time::Duration;

use scribe_queue::{DispatchMessage, JobQueue};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::manager::{AttemptOutcome, JobLifecycleManager};

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How often to scan for messages left pending by crashed consumers
    pub claim_interval: Duration,
    /// Minimum idle time before a pending message can be claimed
    pub claim_min_idle: Duration,
    /// XREADGROUP block time
    pub block: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            claim_interval: Duration::from_secs(30),
            // Longer than a full queued-mode attempt
            claim_min_idle: Duration::from_secs(35 * 60),
            block: Duration::from_secs(1),
        }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            claim_interval: std::env::var("WORKER_CLAIM_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            claim_min_idle: std::env::var("WORKER_CLAIM_MIN_IDLE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_min_idle),
            block: defaults.block,
        }
    }
}

/// Pulls job ids from the Redis stream and runs them on the manager's pool.
pub struct JobExecutor {
    manager: JobLifecycleManager,
    queue: Arc<JobQueue>,
    config: ExecutorConfig,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(manager: JobLifecycleManager, queue: Arc<JobQueue>, config: ExecutorConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            manager,
            queue,
            config,
            shutdown,
            consumer_name: format!("worker-{}", Uuid::new_v4()),
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Consume until `shutdown()` is called, then drain the pool.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name,
            self.manager.pool().capacity()
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = tokio::spawn(Self::claim_loop(
            self.manager.clone(),
            Arc::clone(&self.queue),
            self.consumer_name.clone(),
            self.config.clone(),
            self.shutdown.subscribe(),
        ));

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to finish...");
        self.manager.shutdown().await;

        info!("Job executor stopped");
        Ok(())
    }

    async fn consume_jobs(&self) -> anyhow::Result<()> {
        let available = self.manager.pool().available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let messages = self
            .queue
            .consume(
                &self.consumer_name,
                self.config.block.as_millis() as u64,
                available.min(5),
            )
            .await?;

        if messages.is_empty() {
            return Ok(());
        }
        debug!("Consumed {} jobs from queue", messages.len());

        for (message_id, message) in messages {
            Self::spawn_message(&self.manager, &self.queue, message_id, message);
        }
        Ok(())
    }

    async fn claim_loop(
        manager: JobLifecycleManager,
        queue: Arc<JobQueue>,
        consumer_name: String,
        config: ExecutorConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(config.claim_interval);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match queue.claim_pending(&consumer_name, config.claim_min_idle, 5).await {
                        Ok(messages) if !messages.is_empty() => {
                            info!("Claimed {} pending jobs", messages.len());
                            for (message_id, message) in messages {
                                Self::spawn_message(&manager, &queue, message_id, message);
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Failed to claim pending jobs: {}", e),
                    }
                }
            }
        }
    }

    fn spawn_message(
        manager: &JobLifecycleManager,
        queue: &Arc<JobQueue>,
        message_id: String,
        message: DispatchMessage,
    ) {
        let manager_task = manager.clone();
        let queue = Arc::clone(queue);
        manager.pool().spawn(async move {
            let outcome = manager_task.run_job(message.job_id.clone()).await;
            Self::acknowledge(&queue, &message_id, &message, &outcome).await;
        });
    }

    /// Ack everything except runs cut short by shutdown, which stay pending
    /// for another consumer to claim.
    async fn acknowledge(
        queue: &JobQueue,
        message_id: &str,
        message: &DispatchMessage,
        outcome: &AttemptOutcome,
    ) {
        let job_id = &message.job_id;
        if *outcome == AttemptOutcome::Cancelled {
            debug!(job_id = %job_id, "Leaving message {} pending after shutdown", message_id);
            return;
        }
        if let Err(e) = queue.ack(message_id, message).await {
            error!(job_id = %job_id, "Failed to ack message {}: {}", message_id, e);
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
