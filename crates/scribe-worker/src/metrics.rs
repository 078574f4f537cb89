//! Job lifecycle metrics.
//!
//! These are plain `metrics` macros; they are exported by whichever binary
//! installs a Prometheus recorder.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "scribe_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "scribe_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "scribe_jobs_failed_total";
    pub const JOB_RETRIES_TOTAL: &str = "scribe_job_retries_total";
    pub const JOBS_STUCK_TOTAL: &str = "scribe_jobs_stuck_total";
    pub const JOBS_RESET_TOTAL: &str = "scribe_jobs_reset_total";
    pub const JOBS_ACTIVE: &str = "scribe_jobs_active";
    pub const JOB_DURATION_SECONDS: &str = "scribe_job_duration_seconds";
    pub const STEP_DURATION_SECONDS: &str = "scribe_step_duration_seconds";
}

pub fn record_job_submitted(strategy: &str) {
    let labels = [("strategy", strategy.to_string())];
    counter!(names::JOBS_SUBMITTED_TOTAL, &labels).increment(1);
}

pub fn record_job_completed(strategy: &str, duration_secs: f64) {
    let labels = [("strategy", strategy.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_failed(strategy: &str, kind: &str) {
    let labels = [
        ("strategy", strategy.to_string()),
        ("kind", kind.to_string()),
    ];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_job_retry(strategy: &str, kind: &str) {
    let labels = [
        ("strategy", strategy.to_string()),
        ("kind", kind.to_string()),
    ];
    counter!(names::JOB_RETRIES_TOTAL, &labels).increment(1);
}

pub fn record_job_stuck() {
    counter!(names::JOBS_STUCK_TOTAL).increment(1);
}

pub fn record_job_reset() {
    counter!(names::JOBS_RESET_TOTAL).increment(1);
}

pub fn set_active_jobs(count: usize) {
    gauge!(names::JOBS_ACTIVE).set(count as f64);
}

/// Record the duration of one Transcriber or Analyzer call.
pub fn record_step_duration(step: &str, outcome: &str, duration_secs: f64) {
    let labels = [
        ("step", step.to_string()),
        ("outcome", outcome.to_string()),
    ];
    histogram!(names::STEP_DURATION_SECONDS, &labels).record(duration_secs);
}
