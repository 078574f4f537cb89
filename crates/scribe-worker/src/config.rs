//! Lifecycle configuration.

use std::str::FromStr;
use std::time::Duration;

/// How jobs reach a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Jobs run in the submitting process.
    Direct,
    /// Jobs are published to the Redis stream and run by worker processes.
    Queued,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Direct => "direct",
            ExecutionMode::Queued => "queued",
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" | "local" => Ok(ExecutionMode::Direct),
            "queued" | "queue" | "redis" => Ok(ExecutionMode::Queued),
            other => Err(format!("unknown execution mode: {}", other)),
        }
    }
}

/// Wall-clock limits for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// The attempt is abandoned and recorded as timed out.
    pub hard: Duration,
    /// Only logged.
    pub soft: Option<Duration>,
}

impl ExecutionLimits {
    pub fn for_mode(mode: ExecutionMode) -> Self {
        match mode {
            ExecutionMode::Direct => Self {
                hard: Duration::from_secs(5 * 60),
                soft: None,
            },
            ExecutionMode::Queued => Self {
                hard: Duration::from_secs(30 * 60),
                soft: Some(Duration::from_secs(25 * 60)),
            },
        }
    }
}

/// Job lifecycle configuration.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub mode: ExecutionMode,
    /// Maximum concurrent attempts in this process
    pub max_concurrent_jobs: usize,
    /// Attempts per job before it fails with `retries_exhausted`
    pub max_attempts: u32,
    /// Backoff before the first retry (doubles each attempt)
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Bound on a single Transcriber or Analyzer call
    pub step_timeout: Duration,
    /// Bound on a single job store or blob store call
    pub io_timeout: Duration,
    pub limits: ExecutionLimits,
    /// How often a running step refreshes `updated_at`
    pub heartbeat_interval: Duration,
    /// A processing job silent for longer than this is considered stalled
    pub stuck_threshold: Duration,
    pub watchdog_interval: Duration,
    pub watchdog_enabled: bool,
    /// Requeue stalled jobs instead of failing them
    pub watchdog_auto_reset: bool,
    /// TTL applied when a job reaches a terminal state
    pub completion_ttl: Duration,
    /// Age after which terminal jobs are removed by cleanup
    pub retention: Duration,
    /// Shortest transcript accepted for analysis
    pub min_precursor_chars: usize,
    pub max_upload_bytes: usize,
    /// Delete uploaded blobs once their job settles
    pub release_inputs: bool,
    pub shutdown_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self::for_mode(ExecutionMode::Direct)
    }
}

impl LifecycleConfig {
    /// Defaults for the given execution mode.
    pub fn for_mode(mode: ExecutionMode) -> Self {
        Self {
            mode,
            max_concurrent_jobs: 4,
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(5),
            retry_max_delay: Duration::from_secs(60),
            step_timeout: Duration::from_secs(4 * 60),
            io_timeout: Duration::from_secs(30),
            limits: ExecutionLimits::for_mode(mode),
            heartbeat_interval: Duration::from_secs(30),
            stuck_threshold: Duration::from_secs(10 * 60),
            watchdog_interval: Duration::from_secs(60),
            watchdog_enabled: true,
            watchdog_auto_reset: false,
            completion_ttl: Duration::from_secs(3600), // 1 hour
            retention: Duration::from_secs(3600),
            min_precursor_chars: 50,
            max_upload_bytes: 50 * 1024 * 1024, // 50 MB
            release_inputs: true,
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let mode = std::env::var("EXECUTION_MODE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(ExecutionMode::Direct);
        let defaults = Self::for_mode(mode);

        Self {
            mode,
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS").unwrap_or(defaults.max_concurrent_jobs),
            max_attempts: env_parse::<u32>("JOB_MAX_ATTEMPTS")
                .unwrap_or(defaults.max_attempts)
                .max(1),
            retry_base_delay: env_secs("JOB_RETRY_BASE_DELAY_SECS").unwrap_or(defaults.retry_base_delay),
            retry_max_delay: env_secs("JOB_RETRY_MAX_DELAY_SECS").unwrap_or(defaults.retry_max_delay),
            step_timeout: env_secs("JOB_STEP_TIMEOUT_SECS").unwrap_or(defaults.step_timeout),
            io_timeout: env_secs("JOB_IO_TIMEOUT_SECS").unwrap_or(defaults.io_timeout),
            limits: ExecutionLimits {
                hard: env_secs("JOB_HARD_TIMEOUT_SECS").unwrap_or(defaults.limits.hard),
                soft: env_secs("JOB_SOFT_TIMEOUT_SECS").or(defaults.limits.soft),
            },
            heartbeat_interval: env_secs("JOB_HEARTBEAT_SECS").unwrap_or(defaults.heartbeat_interval),
            stuck_threshold: env_secs("WATCHDOG_STUCK_THRESHOLD_SECS").unwrap_or(defaults.stuck_threshold),
            watchdog_interval: env_secs("WATCHDOG_INTERVAL_SECS").unwrap_or(defaults.watchdog_interval),
            watchdog_enabled: std::env::var("ENABLE_WATCHDOG")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            watchdog_auto_reset: std::env::var("WATCHDOG_AUTO_RESET")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            completion_ttl: env_secs("JOB_COMPLETION_TTL_SECS").unwrap_or(defaults.completion_ttl),
            retention: env_secs("JOB_RETENTION_SECS").unwrap_or(defaults.retention),
            min_precursor_chars: env_parse("MIN_PRECURSOR_CHARS").unwrap_or(defaults.min_precursor_chars),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES").unwrap_or(defaults.max_upload_bytes),
            release_inputs: std::env::var("RELEASE_INPUTS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT").unwrap_or(defaults.shutdown_timeout),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}
