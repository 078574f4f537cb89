//! The job lifecycle manager.
//!
//! Owns the path of a job from submission to a terminal state:
//!
//! ```text
//! submit ──> queued ──claim (CAS)──> processing ──> completed
//!              ^                         │    └───> failed
//!              └──── retry / reset ──────┘
//! ```
//!
//! Records are only ever advanced by the worker that claimed them. Every
//! write after the claim is a compare-and-swap on the record revision, so a
//! reset or watchdog recovery that lands mid-run makes the old worker stop
//! instead of overwriting the newer state.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use scribe_ai::{AiResult, Analyzer, AudioInput, Transcriber};
use scribe_models::{
    ErrorDetail, ErrorKind, Hints, InputRef, JobId, JobRecord, JobStatus, JobStatusView, Strategy,
};
use scribe_queue::{DispatchMessage, EnqueueOutcome, QueueError};
use scribe_storage::{upload_key, BlobStore, StorageError};
use scribe_store::{JobStore, StoreError, StoreResult};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::config::LifecycleConfig;
use crate::dispatch::Dispatcher;
use crate::error::{JobError, JobResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pool::WorkerPool;
use crate::retry::{FailureTracker, RetryPolicy};
use crate::submission::{content_type_for, validate, SubmissionInput};
use crate::timeout::{bounded, with_limits};

/// How one attempt (or one run) ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// No record under this id.
    Missing,
    /// The record was not ours to advance: not queued, or another writer won.
    Superseded,
    Completed,
    Failed(ErrorDetail),
    /// Requeued after a retryable failure; run again after `delay`.
    Retrying { attempt: u32, delay: Duration },
    /// A job store write failed. The record is left for the watchdog.
    Abandoned,
    /// Stopped by pool shutdown. The job was returned to the queue.
    Cancelled,
}

impl AttemptOutcome {
    /// Whether the job reached a terminal state in this attempt.
    pub fn is_settled(&self) -> bool {
        matches!(self, AttemptOutcome::Completed | AttemptOutcome::Failed(_))
    }
}

/// Result of `cleanup_expired`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Terminal records past retention that were deleted
    pub deleted: u64,
    /// Records dropped by the store's own expiry sweep
    pub purged: u64,
    /// Temporary input blobs deleted along with their jobs
    pub inputs_released: u64,
}

/// Counts by status plus jobs that look stuck.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobsOverview {
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// Jobs running in this process
    pub active_here: usize,
    pub stuck: Vec<JobStatusView>,
}

/// Why a run stopped before reaching a terminal write.
enum Interrupt {
    /// A step failed; the job settles with this detail.
    Failed(ErrorDetail),
    /// A compare-and-swap lost: someone else owns the record now.
    Superseded,
    /// The job store rejected or timed out a write.
    Store(StoreError),
}

/// One claim on a record: the attempt number and when it started.
///
/// A stored record still carrying the same claim belongs to this worker,
/// even when its revision moved on through a write whose reply was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Claim {
    attempts: u32,
    started_at: Option<DateTime<Utc>>,
}

impl Claim {
    fn of(record: &JobRecord) -> Self {
        Self {
            attempts: record.attempts,
            started_at: record.started_at,
        }
    }

    fn holds(&self, stored: &JobRecord) -> bool {
        stored.status == JobStatus::Processing && Claim::of(stored) == *self
    }
}

struct Inner {
    config: LifecycleConfig,
    retry: RetryPolicy,
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    transcriber: Arc<dyn Transcriber>,
    analyzer: Arc<dyn Analyzer>,
    dispatcher: Dispatcher,
    pool: WorkerPool,
}

/// Accepts jobs, runs them on the worker pool and answers status queries.
///
/// Cheap to clone; clones share the pool and collaborators.
#[derive(Clone)]
pub struct JobLifecycleManager {
    inner: Arc<Inner>,
}

impl JobLifecycleManager {
    pub fn new(
        config: LifecycleConfig,
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        transcriber: Arc<dyn Transcriber>,
        analyzer: Arc<dyn Analyzer>,
        dispatcher: Dispatcher,
    ) -> Self {
        let pool = WorkerPool::new(config.max_concurrent_jobs);
        let retry = RetryPolicy::from_config(&config);
        info!(
            "Lifecycle manager: mode={}, dispatch={:?}, store={}, blobs={}, transcriber={}, analyzer={}",
            config.mode.as_str(),
            dispatcher,
            store.backend_name(),
            blobs.backend_name(),
            transcriber.name(),
            analyzer.name()
        );
        Self {
            inner: Arc::new(Inner {
                config,
                retry,
                store,
                blobs,
                transcriber,
                analyzer,
                dispatcher,
                pool,
            }),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.inner.store
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.inner.blobs
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// Cancel running jobs and wait for them to hand their records back.
    pub async fn shutdown(&self) {
        self.inner.pool.shutdown(self.inner.config.shutdown_timeout).await;
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Validate, persist a queued record and dispatch it. Returns without
    /// waiting for processing.
    pub async fn submit(
        &self,
        input: SubmissionInput,
        strategy: Strategy,
        hints: Hints,
    ) -> JobResult<JobId> {
        validate(&input, strategy, self.inner.config.max_upload_bytes)?;

        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "submit");

        let mut record = match input {
            SubmissionInput::Upload { filename, bytes } => {
                let key = upload_key(job_id.as_str(), &filename);
                let size = bytes.len();
                self.put_blob(&key, bytes, content_type_for(&filename))
                    .await
                    .map_err(|e| {
                        logger.log_error(&format!("failed to store upload {}: {}", key, e));
                        JobError::storage("Failed to store the uploaded file")
                    })?;
                debug!(job_id = %job_id, "Stored {} bytes at {}", size, key);
                JobRecord::new(strategy, InputRef::Blob(key), hints)
                    .with_filename(filename)
                    .with_temporary_input(self.inner.config.release_inputs)
            }
            SubmissionInput::Text(text) => JobRecord::new(strategy, InputRef::Text(text), hints),
            SubmissionInput::SourceJob(source) => {
                JobRecord::new(strategy, InputRef::Job(source), hints)
            }
        };
        record.job_id = job_id.clone();

        if let Err(e) = self.put_record(&record, None).await {
            logger.log_error(&format!("failed to persist job: {}", e));
            self.discard_upload(&record).await;
            return Err(JobError::storage("Failed to persist the job"));
        }

        if let Err(e) = self.dispatch(&job_id, record.revision).await {
            logger.log_error(&format!("failed to dispatch job: {}", e));
            if let Err(e) = self.delete_record(&job_id).await {
                logger.log_warning(&format!("failed to remove undispatched job: {}", e));
            }
            self.discard_upload(&record).await;
            return Err(e);
        }

        metrics::record_job_submitted(strategy.as_str());
        logger.log_start(&format!("queued with strategy {}", strategy));
        Ok(job_id)
    }

    /// Hand a queued record to whoever executes jobs. `revision` is the
    /// queued record's revision; each one is published at most once.
    async fn dispatch(&self, job_id: &JobId, revision: u64) -> JobResult<()> {
        match &self.inner.dispatcher {
            Dispatcher::Local => {
                self.spawn_job(job_id.clone());
                Ok(())
            }
            Dispatcher::Queue(queue) => {
                let message = DispatchMessage::new(job_id.clone(), revision);
                let outcome = bounded(self.inner.config.io_timeout, queue.enqueue(&message), || {
                    QueueError::connection_failed("queue call timed out")
                })
                .await?;
                match outcome {
                    EnqueueOutcome::Enqueued(message_id) => {
                        debug!(job_id = %job_id, "Dispatched as message {}", message_id)
                    }
                    EnqueueOutcome::AlreadyQueued => {
                        debug!(job_id = %job_id, "Revision {} already has a pending message", revision)
                    }
                }
                Ok(())
            }
        }
    }

    /// Run a job on this process's pool.
    pub fn spawn_job(&self, job_id: JobId) {
        let manager = self.clone();
        self.inner.pool.spawn(async move {
            manager.run_job(job_id).await;
        });
    }

    /// Dispatch queued jobs that nothing is running, e.g. after a restart in
    /// direct mode. Returns how many were dispatched.
    pub async fn resume_queued(&self) -> JobResult<usize> {
        let records = self.list_records().await?;
        let mut resumed = 0;
        for record in records {
            if record.status != JobStatus::Queued || self.inner.pool.is_active(&record.job_id) {
                continue;
            }
            self.dispatch(&record.job_id, record.revision).await?;
            resumed += 1;
        }
        if resumed > 0 {
            info!("Resumed {} queued jobs", resumed);
        }
        Ok(resumed)
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run a job until it settles: one attempt per pool permit, with backoff
    /// between retryable failures.
    pub async fn run_job(&self, job_id: JobId) -> AttemptOutcome {
        let Some(active) = self.inner.pool.register(&job_id) else {
            if self.inner.pool.is_shutting_down() {
                return AttemptOutcome::Cancelled;
            }
            debug!(job_id = %job_id, "Job is already running in this process");
            return AttemptOutcome::Superseded;
        };
        let token = active.token().clone();

        loop {
            let permit = tokio::select! {
                permit = self.inner.pool.acquire() => permit,
                _ = token.cancelled() => None,
            };
            let Some(permit) = permit else {
                return AttemptOutcome::Cancelled;
            };

            let outcome = self.guarded_attempt(&job_id, &token).await;
            drop(permit);

            match outcome {
                AttemptOutcome::Retrying { delay, .. } => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => return AttemptOutcome::Cancelled,
                    }
                }
                other => return other,
            }
        }
    }

    /// One attempt under the hard/soft limits, with panics contained.
    async fn guarded_attempt(&self, job_id: &JobId, token: &CancellationToken) -> AttemptOutcome {
        let logger = JobLogger::new(job_id, "execute");
        let attempt = AssertUnwindSafe(self.execute(job_id)).catch_unwind();
        let limited = with_limits(attempt, self.inner.config.limits, &logger);

        let result = tokio::select! {
            result = limited => result,
            _ = token.cancelled() => {
                logger.log_warning("cancelled by shutdown");
                self.requeue_interrupted(job_id, &logger).await;
                return AttemptOutcome::Cancelled;
            }
        };

        match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => {
                logger.log_error(&format!("attempt panicked: {}", panic_message(panic.as_ref())));
                self.settle_interrupted(job_id, ErrorDetail::processing_failed(), &logger)
                    .await
            }
            Err(exceeded) => {
                logger.log_error(&format!("attempt abandoned: {}", exceeded));
                self.settle_interrupted(job_id, ErrorDetail::job_timeout(), &logger)
                    .await
            }
        }
    }

    /// One attempt of the state machine: claim, run the strategy's steps,
    /// and write the outcome.
    pub async fn execute(&self, job_id: &JobId) -> AttemptOutcome {
        let mut record = match self.load(job_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(job_id = %job_id, "Job record not found; nothing to execute");
                return AttemptOutcome::Missing;
            }
            Err(e) => {
                warn!(job_id = %job_id, "Failed to load job record: {}", e);
                return AttemptOutcome::Abandoned;
            }
        };

        if record.status != JobStatus::Queued {
            debug!(job_id = %job_id, status = %record.status, "Job is not queued; skipping");
            return AttemptOutcome::Superseded;
        }

        let expected = record.revision;
        if record.start_processing().is_err() {
            return AttemptOutcome::Superseded;
        }
        let logger = JobLogger::for_strategy(job_id, record.strategy).with_attempt(record.attempts);
        if let Err(interrupt) = self.save(&record, expected, None).await {
            return interrupted(&logger, interrupt);
        }

        let span = logger.create_span();
        async move {
            logger.log_start(&format!("attempt {}", record.attempts));
            let started = Instant::now();
            match self.run_steps(&mut record, &logger).await {
                Ok(()) => self.finish(record, &logger, started).await,
                Err(Interrupt::Failed(detail)) => {
                    self.settle_failure(record, detail, true, true, &logger).await
                }
                Err(other) => interrupted(&logger, other),
            }
        }
        .instrument(span)
        .await
    }

    async fn run_steps(&self, record: &mut JobRecord, logger: &JobLogger) -> Result<(), Interrupt> {
        let strategy = record.strategy;

        let transcript = if strategy.needs_transcription() {
            let audio = self.read_audio(record, logger).await?;
            let text = self
                .call_step(record, "transcription", logger, self.inner.transcriber.transcribe(&audio))
                .await?
                .map_err(|e| {
                    logger.log_error(&format!(
                        "transcriber {} failed: {}",
                        self.inner.transcriber.name(),
                        e
                    ));
                    Interrupt::Failed(ErrorDetail::transcription_failed())
                })?;
            if text.trim().is_empty() {
                logger.log_warning("transcriber returned an empty transcript");
                return Err(Interrupt::Failed(ErrorDetail::empty_transcript()));
            }

            let claim = Claim::of(record);
            let expected = record.revision;
            record.set_result(text.clone(), strategy.transcription_checkpoint());
            self.save_owned(record, expected, None, Some(claim)).await?;
            logger.log_progress(&format!("transcribed {} characters", text.len()));
            Some(text)
        } else {
            None
        };

        if strategy.needs_analysis() {
            let precursor = match transcript {
                Some(text) => text,
                None => self.load_precursor(record, logger).await?,
            };
            let min_chars = self.inner.config.min_precursor_chars;
            if precursor.trim().chars().count() < min_chars {
                logger.log_warning("no usable transcript to analyze");
                return Err(Interrupt::Failed(ErrorDetail::precursor_missing(min_chars)));
            }

            let hints = record.hints.clone();
            let analysis = self
                .call_step(record, "analysis", logger, self.inner.analyzer.analyze(&precursor, &hints))
                .await?
                .map_err(|e| {
                    logger.log_error(&format!("analyzer {} failed: {}", self.inner.analyzer.name(), e));
                    Interrupt::Failed(ErrorDetail::analysis_failed())
                })?;
            if analysis.trim().is_empty() {
                logger.log_warning("analyzer returned an empty response");
                return Err(Interrupt::Failed(ErrorDetail::analysis_failed()));
            }

            let claim = Claim::of(record);
            let expected = record.revision;
            record.set_analysis(analysis);
            self.save_owned(record, expected, None, Some(claim)).await?;
            logger.log_progress("analysis complete");
        }

        Ok(())
    }

    /// Run one external call under the step timeout, heartbeating the record
    /// while it is in flight.
    async fn call_step<T, F>(
        &self,
        record: &mut JobRecord,
        step: &'static str,
        logger: &JobLogger,
        call: F,
    ) -> Result<AiResult<T>, Interrupt>
    where
        F: Future<Output = AiResult<T>>,
    {
        let started = Instant::now();
        let step_timeout = self.inner.config.step_timeout;
        let deadline = tokio::time::Instant::now() + step_timeout;
        let result = match self.heartbeat_while(record, logger, call, deadline).await? {
            Some(result) => result,
            None => {
                metrics::record_step_duration(step, "timeout", started.elapsed().as_secs_f64());
                logger.log_warning(&format!("{} step timed out after {:?}", step, step_timeout));
                return Err(Interrupt::Failed(ErrorDetail::step_timeout(step)));
            }
        };
        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::record_step_duration(step, outcome, started.elapsed().as_secs_f64());
        Ok(result)
    }

    /// Drive `call` until it finishes or `deadline` passes (`None`),
    /// heartbeating the record meanwhile. The deadline is only checked
    /// between heartbeats, so a heartbeat write is never dropped mid-flight.
    async fn heartbeat_while<F>(
        &self,
        record: &mut JobRecord,
        logger: &JobLogger,
        call: F,
        deadline: tokio::time::Instant,
    ) -> Result<Option<F::Output>, Interrupt>
    where
        F: Future,
    {
        let period = self.inner.config.heartbeat_interval.max(Duration::from_millis(10));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = FailureTracker::new(3);
        tokio::pin!(call);

        loop {
            tokio::select! {
                biased;
                out = &mut call => return Ok(Some(out)),
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
                _ = ticker.tick() => {
                    let claim = Claim::of(record);
                    let mut beat = record.clone();
                    beat.touch();
                    match self.save_owned(&mut beat, record.revision, None, Some(claim)).await {
                        Ok(()) => {
                            *record = beat;
                            failures.record_success();
                        }
                        Err(Interrupt::Store(e)) => {
                            if failures.record_failure() {
                                logger.log_warning(&format!("heartbeat write failed: {}", e));
                            }
                        }
                        Err(other) => return Err(other),
                    }
                }
            }
        }
    }

    async fn read_audio(&self, record: &JobRecord, logger: &JobLogger) -> Result<AudioInput, Interrupt> {
        let Some(key) = record.input_ref.blob_key() else {
            logger.log_error("transcription requested for a job without an uploaded file");
            return Err(Interrupt::Failed(ErrorDetail::new(
                ErrorKind::InvalidInput,
                "This job has no audio to transcribe.",
            )));
        };
        let bytes = self.read_blob(key, logger).await?;
        let filename = record
            .filename
            .clone()
            .unwrap_or_else(|| key.rsplit('/').next().unwrap_or(key).to_string());
        Ok(AudioInput::new(filename, bytes))
    }

    /// The text an analysis-only job annotates.
    async fn load_precursor(&self, record: &JobRecord, logger: &JobLogger) -> Result<String, Interrupt> {
        match &record.input_ref {
            InputRef::Text(text) => Ok(text.clone()),
            InputRef::Job(source) => match self.load(source).await {
                Ok(Some(source_record)) => Ok(source_record.result_text.unwrap_or_default()),
                Ok(None) => {
                    logger.log_warning(&format!("source job {} not found", source));
                    Ok(String::new())
                }
                Err(e) => {
                    logger.log_error(&format!("failed to load source job {}: {}", source, e));
                    Err(Interrupt::Failed(ErrorDetail::storage_unavailable()))
                }
            },
            InputRef::Blob(key) => {
                let bytes = self.read_blob(key, logger).await?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
        }
    }

    async fn read_blob(&self, key: &str, logger: &JobLogger) -> Result<Vec<u8>, Interrupt> {
        bounded(self.inner.config.io_timeout, self.inner.blobs.get(key), || {
            StorageError::download_failed("blob store call timed out")
        })
        .await
        .map_err(|e| {
            logger.log_error(&format!("failed to read input {}: {}", key, e));
            match e {
                StorageError::NotFound(_) => Interrupt::Failed(ErrorDetail::input_missing()),
                _ => Interrupt::Failed(ErrorDetail::storage_unavailable()),
            }
        })
    }

    async fn finish(&self, mut record: JobRecord, logger: &JobLogger, started: Instant) -> AttemptOutcome {
        let claim = Claim::of(&record);
        let expected = record.revision;
        self.release_input(&mut record, logger).await;
        if record.complete().is_err() {
            return AttemptOutcome::Superseded;
        }
        let ttl = Some(self.inner.config.completion_ttl);
        if let Err(interrupt) = self.save_owned(&mut record, expected, ttl, Some(claim)).await {
            return interrupted(logger, interrupt);
        }

        metrics::record_job_completed(record.strategy.as_str(), started.elapsed().as_secs_f64());
        logger.log_completion(&format!("finished in {:.1}s", started.elapsed().as_secs_f64()));
        AttemptOutcome::Completed
    }

    /// Requeue a retryable failure while attempts remain, otherwise write
    /// FAILED. Partial outputs already on the record are kept.
    async fn settle_failure(
        &self,
        mut record: JobRecord,
        detail: ErrorDetail,
        allow_retry: bool,
        owned: bool,
        logger: &JobLogger,
    ) -> AttemptOutcome {
        let strategy = record.strategy;
        let claim = owned.then(|| Claim::of(&record));
        let expected = record.revision;
        let retryable = detail.kind.is_retryable();

        if allow_retry && retryable && self.inner.retry.allows_another(record.attempts) {
            let attempt = record.attempts;
            if record.requeue().is_err() {
                return AttemptOutcome::Superseded;
            }
            if let Err(interrupt) = self.save_owned(&mut record, expected, None, claim).await {
                return interrupted(logger, interrupt);
            }
            let delay = self.inner.retry.delay_after(attempt);
            metrics::record_job_retry(strategy.as_str(), detail.kind.as_str());
            logger.log_warning(&format!(
                "attempt {} failed ({}), retrying in {:?}",
                attempt, detail.kind, delay
            ));
            return AttemptOutcome::Retrying { attempt, delay };
        }

        let detail = if allow_retry && retryable && self.inner.retry.max_attempts > 1 {
            ErrorDetail::retries_exhausted(record.attempts, &detail)
        } else {
            detail
        };

        self.release_input(&mut record, logger).await;
        if record.fail(detail.clone()).is_err() {
            return AttemptOutcome::Superseded;
        }
        let ttl = Some(self.inner.config.completion_ttl);
        if let Err(interrupt) = self.save_owned(&mut record, expected, ttl, claim).await {
            return interrupted(logger, interrupt);
        }

        metrics::record_job_failed(strategy.as_str(), detail.kind.as_str());
        logger.log_error(&format!("{} ({})", detail.message, detail.kind));
        AttemptOutcome::Failed(detail)
    }

    /// Settle a job whose attempt future was dropped (timeout or panic).
    async fn settle_interrupted(&self, job_id: &JobId, detail: ErrorDetail, logger: &JobLogger) -> AttemptOutcome {
        match self.load(job_id).await {
            Ok(Some(record)) if record.status == JobStatus::Processing => {
                let logger = logger.clone().with_attempt(record.attempts);
                self.settle_failure(record, detail, true, true, &logger).await
            }
            Ok(_) => AttemptOutcome::Superseded,
            Err(e) => {
                logger.log_error(&format!("failed to load job after interruption: {}", e));
                AttemptOutcome::Abandoned
            }
        }
    }

    /// Hand a processing job back to the queue when the pool shuts down.
    async fn requeue_interrupted(&self, job_id: &JobId, logger: &JobLogger) {
        let mut record = match self.load(job_id).await {
            Ok(Some(record)) if record.status == JobStatus::Processing => record,
            Ok(_) => return,
            Err(e) => {
                logger.log_warning(&format!("could not requeue on shutdown: {}", e));
                return;
            }
        };
        let expected = record.revision;
        if record.requeue().is_ok() && self.save(&record, expected, None).await.is_ok() {
            logger.log_progress("returned to queue on shutdown");
        }
    }

    /// Delete the job's temporary input blob before its terminal write.
    async fn release_input(&self, record: &mut JobRecord, logger: &JobLogger) {
        if !record.owns_unreleased_blob() {
            return;
        }
        let Some(key) = record.input_ref.blob_key().map(str::to_string) else {
            return;
        };
        match self.delete_blob(&key).await {
            Ok(()) => record.input_released = true,
            Err(e) => logger.log_warning(&format!("failed to release input {}: {}", key, e)),
        }
    }

    // ------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------

    /// Return a terminal or stalled job to `queued` and dispatch it again.
    pub async fn reset(&self, job_id: &JobId) -> JobResult<JobStatusView> {
        let logger = JobLogger::new(job_id, "reset");
        let mut record = self
            .load(job_id)
            .await?
            .ok_or_else(|| JobError::not_found(job_id.as_str()))?;

        if self.inner.pool.is_active(job_id) {
            return Err(JobError::conflict("Job is currently running"));
        }
        match record.status {
            JobStatus::Queued => return Err(JobError::conflict("Job is already queued")),
            JobStatus::Processing if !record.is_stalled(self.stuck_threshold(), Utc::now()) => {
                return Err(JobError::conflict("Job is still processing"));
            }
            _ => {}
        }

        let expected = record.revision;
        record.reset();
        let written = bounded(
            self.inner.config.io_timeout,
            self.inner.store.compare_and_put(&record, expected, None),
            store_timeout,
        )
        .await?;
        if !written {
            return Err(JobError::conflict("Job changed while resetting; try again"));
        }

        metrics::record_job_reset();
        logger.log_progress("reset to queued");
        self.dispatch(job_id, record.revision).await?;
        Ok(JobStatusView::from(&record))
    }

    /// Fail or requeue a processing job whose worker stopped writing.
    ///
    /// Jobs running in this process and jobs that wrote recently are left
    /// alone (`Superseded`).
    pub async fn recover_stalled(&self, record: JobRecord, requeue: bool) -> AttemptOutcome {
        if self.inner.pool.is_active(&record.job_id)
            || !record.is_stalled(self.stuck_threshold(), Utc::now())
        {
            return AttemptOutcome::Superseded;
        }

        let job_id = record.job_id.clone();
        let logger = JobLogger::new(&job_id, "watchdog").with_attempt(record.attempts);
        metrics::record_job_stuck();
        logger.log_warning(&format!(
            "no progress for {}s",
            record.idle_for(Utc::now()).num_seconds()
        ));

        let outcome = self
            .settle_failure(record, ErrorDetail::worker_stalled(), requeue, false, &logger)
            .await;
        if let AttemptOutcome::Retrying { .. } = outcome {
            let dispatched = match self.load(&job_id).await {
                Ok(Some(requeued)) if requeued.status == JobStatus::Queued => {
                    self.dispatch(&job_id, requeued.revision).await
                }
                Ok(_) => Ok(()),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = dispatched {
                logger.log_error(&format!("failed to dispatch recovered job: {}", e));
            }
        }
        outcome
    }

    /// Delete terminal jobs settled longer than `retention` ago, releasing
    /// their inputs, then sweep the store's expired records.
    pub async fn cleanup_expired(&self, retention: Duration) -> JobResult<CleanupReport> {
        let cutoff = chrono_duration(retention);
        let now = Utc::now();
        let mut report = CleanupReport::default();

        for record in self.list_records().await? {
            if !record.is_past_retention(cutoff, now) {
                continue;
            }
            if record.owns_unreleased_blob() {
                if let Some(key) = record.input_ref.blob_key() {
                    match self.delete_blob(key).await {
                        Ok(()) => report.inputs_released += 1,
                        Err(e) => warn!(job_id = %record.job_id, "Failed to release input {}: {}", key, e),
                    }
                }
            }
            if self.delete_record(&record.job_id).await? {
                report.deleted += 1;
            }
        }

        report.purged = bounded(self.inner.config.io_timeout, self.inner.store.purge_expired(), store_timeout)
            .await?;

        if report.deleted > 0 || report.purged > 0 {
            info!(
                "Cleanup removed {} jobs past retention, purged {} expired, released {} inputs",
                report.deleted, report.purged, report.inputs_released
            );
        }
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn get_status(&self, job_id: &JobId) -> JobResult<Option<JobStatusView>> {
        Ok(self.load(job_id).await?.map(JobStatusView::from))
    }

    pub async fn list(&self) -> JobResult<Vec<JobStatusView>> {
        Ok(self
            .list_records()
            .await?
            .iter()
            .map(JobStatusView::from)
            .collect())
    }

    /// Processing jobs that have not written within the stuck threshold.
    pub async fn stalled_jobs(&self) -> JobResult<Vec<JobRecord>> {
        let threshold = self.stuck_threshold();
        let now = Utc::now();
        Ok(self
            .list_records()
            .await?
            .into_iter()
            .filter(|record| record.is_stalled(threshold, now))
            .collect())
    }

    pub async fn overview(&self) -> JobResult<JobsOverview> {
        let threshold = self.stuck_threshold();
        let now = Utc::now();
        let records = self.list_records().await?;

        let mut overview = JobsOverview {
            total: records.len(),
            active_here: self.inner.pool.active_count(),
            ..Default::default()
        };
        for record in &records {
            match record.status {
                JobStatus::Queued => overview.queued += 1,
                JobStatus::Processing => overview.processing += 1,
                JobStatus::Completed => overview.completed += 1,
                JobStatus::Failed => overview.failed += 1,
            }
            if record.is_stalled(threshold, now) {
                overview.stuck.push(JobStatusView::from(record));
            }
        }
        Ok(overview)
    }

    // ------------------------------------------------------------------
    // Store and blob plumbing
    // ------------------------------------------------------------------

    fn stuck_threshold(&self) -> chrono::Duration {
        chrono_duration(self.inner.config.stuck_threshold)
    }

    async fn load(&self, job_id: &JobId) -> StoreResult<Option<JobRecord>> {
        bounded(self.inner.config.io_timeout, self.inner.store.get(job_id), store_timeout).await
    }

    async fn list_records(&self) -> StoreResult<Vec<JobRecord>> {
        bounded(self.inner.config.io_timeout, self.inner.store.list(), store_timeout).await
    }

    async fn put_record(&self, record: &JobRecord, ttl: Option<Duration>) -> StoreResult<()> {
        bounded(self.inner.config.io_timeout, self.inner.store.put(record, ttl), store_timeout).await
    }

    async fn delete_record(&self, job_id: &JobId) -> StoreResult<bool> {
        bounded(self.inner.config.io_timeout, self.inner.store.delete(job_id), store_timeout).await
    }

    /// Compare-and-swap write of a record this worker owns.
    async fn save(&self, record: &JobRecord, expected: u64, ttl: Option<Duration>) -> Result<(), Interrupt> {
        let written = bounded(
            self.inner.config.io_timeout,
            self.inner.store.compare_and_put(record, expected, ttl),
            store_timeout,
        )
        .await
        .map_err(Interrupt::Store)?;
        if written {
            Ok(())
        } else {
            Err(Interrupt::Superseded)
        }
    }

    /// `save` for a record under `claim`. When the compare-and-swap loses
    /// but the stored record still carries the claim, the revision moved
    /// through one of this worker's own writes whose reply never arrived
    /// (a timed-out heartbeat); rebase onto the stored revision and retry.
    async fn save_owned(
        &self,
        record: &mut JobRecord,
        expected: u64,
        ttl: Option<Duration>,
        claim: Option<Claim>,
    ) -> Result<(), Interrupt> {
        let result = self.save(record, expected, ttl).await;
        let Some(claim) = claim else {
            return result;
        };
        match result {
            Err(Interrupt::Superseded) => {}
            other => return other,
        }
        let stored = match self.load(&record.job_id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return Err(Interrupt::Superseded),
            Err(e) => return Err(Interrupt::Store(e)),
        };
        if !claim.holds(&stored) || stored.revision == expected {
            return Err(Interrupt::Superseded);
        }
        debug!(
            job_id = %record.job_id,
            "Rebasing write from revision {} onto {}", expected, stored.revision
        );
        record.revision = stored.revision + 1;
        self.save(record, stored.revision, ttl).await
    }

    async fn put_blob(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        bounded(
            self.inner.config.io_timeout,
            self.inner.blobs.put(key, bytes, content_type),
            || StorageError::upload_failed("blob store call timed out"),
        )
        .await
    }

    async fn delete_blob(&self, key: &str) -> Result<(), StorageError> {
        bounded(self.inner.config.io_timeout, self.inner.blobs.delete(key), || {
            StorageError::delete_failed("blob store call timed out")
        })
        .await
    }

    /// Remove the upload of a job that never got queued.
    async fn discard_upload(&self, record: &JobRecord) {
        if let Some(key) = record.input_ref.blob_key() {
            if let Err(e) = self.delete_blob(key).await {
                warn!(job_id = %record.job_id, "Failed to remove orphaned upload {}: {}", key, e);
            }
        }
    }
}

fn interrupted(logger: &JobLogger, interrupt: Interrupt) -> AttemptOutcome {
    match interrupt {
        Interrupt::Superseded => {
            logger.log_warning("record changed by another writer; stopping");
            AttemptOutcome::Superseded
        }
        Interrupt::Store(e) => {
            logger.log_error(&format!("job store write failed, abandoning attempt: {}", e));
            AttemptOutcome::Abandoned
        }
        Interrupt::Failed(detail) => AttemptOutcome::Failed(detail),
    }
}

fn store_timeout() -> StoreError {
    StoreError::connection_failed("job store call timed out")
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
