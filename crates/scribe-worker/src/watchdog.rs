//! Background detection of stalled jobs.
//!
//! A job is stalled when it is `processing` but its worker has not written
//! the record (checkpoint or heartbeat) within the stuck threshold, and it is
//! not running in this process. Stalled jobs are failed with a timeout, or
//! requeued when auto-reset is enabled. Each cycle also removes terminal jobs
//! past retention.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::JobResult;
use crate::manager::{AttemptOutcome, JobLifecycleManager};
use crate::retry::FailureTracker;

/// Counts from one watchdog cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchdogReport {
    pub stalled: u32,
    pub requeued: u32,
    pub failed: u32,
    pub cleaned: u64,
}

/// Stalled job watchdog.
pub struct Watchdog {
    manager: JobLifecycleManager,
    interval: Duration,
    auto_reset: bool,
    retention: Duration,
    enabled: bool,
}

impl Watchdog {
    pub fn new(manager: JobLifecycleManager) -> Self {
        let config = manager.config();
        Self {
            interval: config.watchdog_interval,
            auto_reset: config.watchdog_auto_reset,
            retention: config.retention,
            enabled: config.watchdog_enabled,
            manager,
        }
    }

    pub fn with_auto_reset(mut self, auto_reset: bool) -> Self {
        self.auto_reset = auto_reset;
        self
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        if !self.enabled {
            info!("Stalled job watchdog is disabled");
            return;
        }

        info!(
            "Starting stalled job watchdog (interval: {:?}, auto_reset: {})",
            self.interval, self.auto_reset
        );

        let mut ticker = interval(self.interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = FailureTracker::new(3);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Watchdog stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match self.check_once().await {
                        Ok(_) => failures.record_success(),
                        Err(e) => {
                            if failures.record_failure() {
                                error!("Watchdog cycle failed: {}", e);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Run a single detection, recovery and cleanup cycle.
    pub async fn check_once(&self) -> JobResult<WatchdogReport> {
        let mut report = self.detect_and_recover().await?;
        report.cleaned = self.manager.cleanup_expired(self.retention).await?.deleted;
        Ok(report)
    }

    async fn detect_and_recover(&self) -> JobResult<WatchdogReport> {
        let mut report = WatchdogReport::default();

        for record in self.manager.stalled_jobs().await? {
            let job_id = record.job_id.clone();
            match self.manager.recover_stalled(record, self.auto_reset).await {
                AttemptOutcome::Retrying { attempt, .. } => {
                    report.stalled += 1;
                    report.requeued += 1;
                    info!(job_id = %job_id, "Requeued stalled job after attempt {}", attempt);
                }
                AttemptOutcome::Failed(detail) => {
                    report.stalled += 1;
                    report.failed += 1;
                    info!(job_id = %job_id, kind = %detail.kind, "Failed stalled job");
                }
                AttemptOutcome::Superseded => {}
                other => {
                    report.stalled += 1;
                    warn!(job_id = %job_id, "Could not recover stalled job: {:?}", other);
                }
            }
        }

        if report.stalled > 0 {
            info!(
                "Watchdog cycle: {} stalled, {} requeued, {} failed",
                report.stalled, report.requeued, report.failed
            );
        }
        Ok(report)
    }
}
