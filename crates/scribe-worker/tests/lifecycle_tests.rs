//! Lifecycle tests against in-memory stores and scripted AI providers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use scribe_ai::{AiError, AiResult, Analyzer, AudioInput, Transcriber};
use scribe_models::{
    ErrorKind, Hints, InputRef, JobId, JobRecord, JobStatus, JobStatusView, Strategy,
};
use scribe_queue::{DispatchMessage, DispatchQueue, EnqueueOutcome, QueueResult};
use scribe_storage::{BlobStore, MemoryBlobStore};
use scribe_store::{JobStore, MemoryJobStore, StoreError, StoreResult};
use scribe_worker::{
    AttemptOutcome, Dispatcher, ExecutionLimits, JobError, JobLifecycleManager, LifecycleConfig,
    SubmissionInput, Watchdog,
};

const TRANSCRIPT: &str = "So I was on a plane the other day, and the airline food, \
                          what is the deal with that? Tiny pretzels. Tiny.";

// ---------------------------------------------------------------------------
// Scripted providers
// ---------------------------------------------------------------------------

/// Returns `text` after `delay`, failing the first `failures` calls.
struct ScriptedTranscriber {
    text: String,
    delay: Duration,
    failures: u32,
    calls: AtomicU32,
}

impl ScriptedTranscriber {
    fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            delay: Duration::ZERO,
            failures: 0,
            calls: AtomicU32::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing(mut self, failures: u32) -> Self {
        self.failures = failures;
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _audio: &AudioInput) -> AiResult<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if call < self.failures {
            return Err(AiError::Api {
                status: 503,
                body: "upstream unavailable".to_string(),
            });
        }
        Ok(self.text.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Waits for a notification before answering.
struct BlockingTranscriber {
    release: Arc<Notify>,
}

#[async_trait]
impl Transcriber for BlockingTranscriber {
    async fn transcribe(&self, _audio: &AudioInput) -> AiResult<String> {
        self.release.notified().await;
        Ok(TRANSCRIPT.to_string())
    }

    fn name(&self) -> &str {
        "blocking"
    }
}

/// Prefixes the text with `ANALYZED:`.
#[derive(Default)]
struct PrefixAnalyzer {
    delay: Duration,
    calls: AtomicU32,
}

#[async_trait]
impl Analyzer for PrefixAnalyzer {
    async fn analyze(&self, text: &str, _hints: &Hints) -> AiResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(format!("ANALYZED:{}", text))
    }

    fn name(&self) -> &str {
        "prefix"
    }
}

struct PanickingAnalyzer;

#[async_trait]
impl Analyzer for PanickingAnalyzer {
    async fn analyze(&self, _text: &str, _hints: &Hints) -> AiResult<String> {
        panic!("analyzer bug");
    }

    fn name(&self) -> &str {
        "panicking"
    }
}

/// Applies every write, then answers late, or not at all for one
/// chosen compare-and-put call.
struct LaggingStore {
    inner: MemoryJobStore,
    reply_delay: Duration,
    /// 1-based compare-and-put call whose reply is replaced by an error
    lost_reply: Option<u32>,
    swaps: AtomicU32,
}

impl LaggingStore {
    fn new() -> Self {
        Self {
            inner: MemoryJobStore::new(),
            reply_delay: Duration::ZERO,
            lost_reply: None,
            swaps: AtomicU32::new(0),
        }
    }

    fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    fn losing_reply(mut self, call: u32) -> Self {
        self.lost_reply = Some(call);
        self
    }
}

#[async_trait]
impl JobStore for LaggingStore {
    async fn put(&self, record: &JobRecord, ttl: Option<Duration>) -> StoreResult<()> {
        self.inner.put(record, ttl).await
    }

    async fn get(&self, job_id: &JobId) -> StoreResult<Option<JobRecord>> {
        self.inner.get(job_id).await
    }

    async fn list(&self) -> StoreResult<Vec<JobRecord>> {
        self.inner.list().await
    }

    async fn delete(&self, job_id: &JobId) -> StoreResult<bool> {
        self.inner.delete(job_id).await
    }

    async fn compare_and_put(
        &self,
        record: &JobRecord,
        expected_revision: u64,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let call = self.swaps.fetch_add(1, Ordering::SeqCst) + 1;
        let written = self.inner.compare_and_put(record, expected_revision, ttl).await?;
        if !self.reply_delay.is_zero() {
            tokio::time::sleep(self.reply_delay).await;
        }
        if self.lost_reply == Some(call) {
            return Err(StoreError::connection_failed("connection reset"));
        }
        Ok(written)
    }

    async fn purge_expired(&self) -> StoreResult<u64> {
        self.inner.purge_expired().await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    fn backend_name(&self) -> &'static str {
        "lagging"
    }

    fn native_ttl(&self) -> bool {
        false
    }
}

/// In-memory stand-in for the Redis stream: one pending slot per dedup key.
#[derive(Default)]
struct RecordingQueue {
    pending: Mutex<HashSet<String>>,
    published: Mutex<Vec<DispatchMessage>>,
}

impl RecordingQueue {
    fn published(&self) -> Vec<DispatchMessage> {
        self.published.lock().unwrap().clone()
    }

    fn ack(&self, message: &DispatchMessage) {
        self.pending.lock().unwrap().remove(&message.dedup_key("test"));
    }
}

#[async_trait]
impl DispatchQueue for RecordingQueue {
    async fn enqueue(&self, message: &DispatchMessage) -> QueueResult<EnqueueOutcome> {
        if !self.pending.lock().unwrap().insert(message.dedup_key("test")) {
            return Ok(EnqueueOutcome::AlreadyQueued);
        }
        let mut published = self.published.lock().unwrap();
        published.push(message.clone());
        Ok(EnqueueOutcome::Enqueued(format!("{}-0", published.len())))
    }

    fn stream_name(&self) -> &str {
        "test"
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    manager: JobLifecycleManager,
    store: Arc<MemoryJobStore>,
    blobs: Arc<MemoryBlobStore>,
}

fn test_config() -> LifecycleConfig {
    LifecycleConfig {
        retry_base_delay: Duration::from_millis(10),
        retry_max_delay: Duration::from_millis(50),
        step_timeout: Duration::from_secs(30),
        io_timeout: Duration::from_secs(5),
        heartbeat_interval: Duration::from_secs(60),
        ..LifecycleConfig::default()
    }
}

fn harness(
    config: LifecycleConfig,
    transcriber: Arc<dyn Transcriber>,
    analyzer: Arc<dyn Analyzer>,
) -> Harness {
    let store = Arc::new(MemoryJobStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let manager = JobLifecycleManager::new(
        config,
        store.clone(),
        blobs.clone(),
        transcriber,
        analyzer,
        Dispatcher::Local,
    );
    Harness {
        manager,
        store,
        blobs,
    }
}

fn upload() -> SubmissionInput {
    SubmissionInput::upload("set.mp3", vec![0x49, 0x44, 0x33, 0x04])
}

async fn wait_for_terminal(manager: &JobLifecycleManager, job_id: &JobId) -> JobStatusView {
    let poll = async {
        loop {
            // Also wait for the run to unregister so a follow-up reset is accepted
            if let Some(view) = manager.get_status(job_id).await.unwrap() {
                if view.status.is_terminal() && !manager.pool().is_active(job_id) {
                    return view;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(600), poll)
        .await
        .expect("job did not settle")
}

fn status_rank(status: JobStatus) -> u8 {
    match status {
        JobStatus::Queued => 0,
        JobStatus::Processing => 1,
        JobStatus::Completed | JobStatus::Failed => 2,
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_submit_returns_before_processing_finishes() {
    let release = Arc::new(Notify::new());
    let h = harness(
        test_config(),
        Arc::new(BlockingTranscriber {
            release: release.clone(),
        }),
        Arc::new(PrefixAnalyzer::default()),
    );

    let job_id = h
        .manager
        .submit(upload(), Strategy::TranscribeOnly, Hints::default())
        .await
        .unwrap();

    let view = h.manager.get_status(&job_id).await.unwrap().unwrap();
    assert!(!view.status.is_terminal());
    assert_eq!(view.result_text, None);

    // Progress and status only move forward while polling
    let mut last_rank = status_rank(view.status);
    let mut last_progress = view.progress;
    release.notify_one();
    loop {
        let view = h.manager.get_status(&job_id).await.unwrap().unwrap();
        assert!(status_rank(view.status) >= last_rank);
        assert!(view.progress >= last_progress);
        last_rank = status_rank(view.status);
        last_progress = view.progress;
        if view.status.is_terminal() {
            assert_eq!(view.status, JobStatus::Completed);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_oversized_upload_rejected_without_record() {
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PrefixAnalyzer::default()),
    );

    let input = SubmissionInput::upload("set.mp3", vec![0u8; 60 * 1024 * 1024]);
    let err = h
        .manager
        .submit(input, Strategy::TranscribeOnly, Hints::default())
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::InvalidInput(_)));
    assert!(h.store.list().await.unwrap().is_empty());
    assert!(h.blobs.is_empty().await);
}

#[tokio::test]
async fn test_unsupported_extension_rejected() {
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PrefixAnalyzer::default()),
    );

    let err = h
        .manager
        .submit(
            SubmissionInput::upload("set.exe", vec![1, 2, 3]),
            Strategy::TranscribeAndAnalyze,
            Hints::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::InvalidInput(_)));
    assert!(h.store.list().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_transcribe_only_round_trip() {
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PrefixAnalyzer::default()),
    );

    let job_id = h
        .manager
        .submit(upload(), Strategy::TranscribeOnly, Hints::default())
        .await
        .unwrap();
    let view = wait_for_terminal(&h.manager, &job_id).await;

    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.result_text.as_deref(), Some(TRANSCRIPT));
    assert_eq!(view.analysis_text, None);
    assert_eq!(view.progress, 100);
    assert_eq!(view.attempts, 1);
    assert!(view.error_detail.is_none());
    assert!(view.completed_at.is_some());

    // The upload is released once the job settles
    assert!(h.blobs.is_empty().await);
    let record = h.store.get(&job_id).await.unwrap().unwrap();
    assert!(record.input_released);
    assert_eq!(record.ttl_secs, Some(3600));
}

#[tokio::test]
async fn test_transcribe_and_analyze() {
    let analyzer = Arc::new(PrefixAnalyzer::default());
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        analyzer.clone(),
    );

    let job_id = h
        .manager
        .submit(
            upload(),
            Strategy::TranscribeAndAnalyze,
            Hints::new(Some("Airline food\nPretzels".into()), None),
        )
        .await
        .unwrap();
    let view = wait_for_terminal(&h.manager, &job_id).await;

    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.result_text.as_deref(), Some(TRANSCRIPT));
    assert_eq!(view.analysis_text, Some(format!("ANALYZED:{}", TRANSCRIPT)));
    assert_eq!(view.progress, 100);
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_analyze_only_short_precursor_fails() {
    let analyzer = Arc::new(PrefixAnalyzer::default());
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        analyzer.clone(),
    );

    let job_id = h
        .manager
        .submit(
            SubmissionInput::Text("too short".into()),
            Strategy::AnalyzeOnly,
            Hints::default(),
        )
        .await
        .unwrap();
    let view = wait_for_terminal(&h.manager, &job_id).await;

    assert_eq!(view.status, JobStatus::Failed);
    let detail = view.error_detail.unwrap();
    assert_eq!(detail.kind, ErrorKind::PrecursorMissing);
    // Not retried
    assert_eq!(view.attempts, 1);
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_analyze_only_from_source_job() {
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PrefixAnalyzer::default()),
    );

    let source = h
        .manager
        .submit(upload(), Strategy::TranscribeOnly, Hints::default())
        .await
        .unwrap();
    wait_for_terminal(&h.manager, &source).await;

    let job_id = h
        .manager
        .submit(
            SubmissionInput::SourceJob(source.clone()),
            Strategy::AnalyzeOnly,
            Hints::default(),
        )
        .await
        .unwrap();
    let view = wait_for_terminal(&h.manager, &job_id).await;

    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.result_text, None);
    assert_eq!(view.analysis_text, Some(format!("ANALYZED:{}", TRANSCRIPT)));
}

#[tokio::test]
async fn test_analyze_only_missing_source_job() {
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PrefixAnalyzer::default()),
    );

    let job_id = h
        .manager
        .submit(
            SubmissionInput::SourceJob(JobId::from_string("does-not-exist")),
            Strategy::AnalyzeOnly,
            Hints::default(),
        )
        .await
        .unwrap();
    let view = wait_for_terminal(&h.manager, &job_id).await;

    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.error_detail.unwrap().kind, ErrorKind::PrecursorMissing);
}

#[tokio::test]
async fn test_terminal_status_is_stable() {
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PrefixAnalyzer::default()),
    );

    let job_id = h
        .manager
        .submit(upload(), Strategy::TranscribeAndAnalyze, Hints::default())
        .await
        .unwrap();
    wait_for_terminal(&h.manager, &job_id).await;

    let first = h.manager.get_status(&job_id).await.unwrap();
    let second = h.manager.get_status(&job_id).await.unwrap();
    assert_eq!(first, second);
}

// ---------------------------------------------------------------------------
// Failures, timeouts and retries
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_slow_transcriber_times_out() {
    let config = LifecycleConfig {
        step_timeout: Duration::from_secs(2),
        max_attempts: 1,
        ..test_config()
    };
    let h = harness(
        config,
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT).with_delay(Duration::from_secs(120))),
        Arc::new(PrefixAnalyzer::default()),
    );

    let started = tokio::time::Instant::now();
    let job_id = h
        .manager
        .submit(upload(), Strategy::TranscribeOnly, Hints::default())
        .await
        .unwrap();
    let view = wait_for_terminal(&h.manager, &job_id).await;

    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.error_detail.unwrap().kind, ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_hard_limit_keeps_partial_results() {
    let config = LifecycleConfig {
        limits: ExecutionLimits {
            hard: Duration::from_secs(10),
            soft: Some(Duration::from_secs(5)),
        },
        step_timeout: Duration::from_secs(300),
        max_attempts: 1,
        ..test_config()
    };
    let h = harness(
        config,
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PrefixAnalyzer {
            delay: Duration::from_secs(600),
            ..Default::default()
        }),
    );

    let job_id = h
        .manager
        .submit(upload(), Strategy::TranscribeAndAnalyze, Hints::default())
        .await
        .unwrap();
    let view = wait_for_terminal(&h.manager, &job_id).await;

    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.error_detail.unwrap().kind, ErrorKind::Timeout);
    assert_eq!(view.result_text.as_deref(), Some(TRANSCRIPT));
    assert_eq!(view.analysis_text, None);
    assert_eq!(view.progress, 50);
    assert!(h.blobs.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout_during_slow_heartbeat_fails_job() {
    let config = LifecycleConfig {
        heartbeat_interval: Duration::from_secs(1),
        step_timeout: Duration::from_millis(2500),
        max_attempts: 1,
        ..test_config()
    };
    let store = Arc::new(LaggingStore::new().with_reply_delay(Duration::from_millis(800)));
    let manager = JobLifecycleManager::new(
        config,
        store,
        Arc::new(MemoryBlobStore::new()),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT).with_delay(Duration::from_secs(100))),
        Arc::new(PrefixAnalyzer::default()),
        Dispatcher::Local,
    );

    let started = tokio::time::Instant::now();
    let job_id = manager
        .submit(upload(), Strategy::TranscribeOnly, Hints::default())
        .await
        .unwrap();
    let view = wait_for_terminal(&manager, &job_id).await;

    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.error_detail.unwrap().kind, ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_lost_heartbeat_reply_does_not_strand_job() {
    let config = LifecycleConfig {
        heartbeat_interval: Duration::from_secs(1),
        ..test_config()
    };
    // Call 1 is the claim, call 2 the first heartbeat
    let store = Arc::new(LaggingStore::new().losing_reply(2));
    let manager = JobLifecycleManager::new(
        config,
        store,
        Arc::new(MemoryBlobStore::new()),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT).with_delay(Duration::from_millis(3500))),
        Arc::new(PrefixAnalyzer::default()),
        Dispatcher::Local,
    );

    let job_id = manager
        .submit(upload(), Strategy::TranscribeOnly, Hints::default())
        .await
        .unwrap();
    let view = wait_for_terminal(&manager, &job_id).await;

    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.result_text.as_deref(), Some(TRANSCRIPT));
    assert_eq!(view.attempts, 1);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let transcriber = Arc::new(ScriptedTranscriber::new(TRANSCRIPT).failing(1));
    let h = harness(
        test_config(),
        transcriber.clone(),
        Arc::new(PrefixAnalyzer::default()),
    );

    let job_id = h
        .manager
        .submit(upload(), Strategy::TranscribeOnly, Hints::default())
        .await
        .unwrap();
    let view = wait_for_terminal(&h.manager, &job_id).await;

    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.attempts, 2);
    assert_eq!(transcriber.calls(), 2);
    assert!(view.error_detail.is_none());
}

#[tokio::test]
async fn test_retries_exhausted() {
    let transcriber = Arc::new(ScriptedTranscriber::new(TRANSCRIPT).failing(u32::MAX));
    let h = harness(
        test_config(),
        transcriber.clone(),
        Arc::new(PrefixAnalyzer::default()),
    );

    let job_id = h
        .manager
        .submit(upload(), Strategy::TranscribeOnly, Hints::default())
        .await
        .unwrap();
    let view = wait_for_terminal(&h.manager, &job_id).await;

    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.attempts, 3);
    assert_eq!(transcriber.calls(), 3);
    let detail = view.error_detail.unwrap();
    assert_eq!(detail.kind, ErrorKind::RetriesExhausted);
    assert!(detail.message.contains("3 attempts"));
    // Vendor detail stays out of the record
    assert!(!detail.message.contains("upstream"));
}

#[tokio::test]
async fn test_panic_recorded_as_processing_failure() {
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PanickingAnalyzer),
    );

    let job_id = h
        .manager
        .submit(upload(), Strategy::TranscribeAndAnalyze, Hints::default())
        .await
        .unwrap();
    let view = wait_for_terminal(&h.manager, &job_id).await;

    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.error_detail.unwrap().kind, ErrorKind::ProcessingFailure);
    assert_eq!(view.result_text.as_deref(), Some(TRANSCRIPT));

    // The manager keeps serving jobs afterwards
    let next = h
        .manager
        .submit(upload(), Strategy::TranscribeOnly, Hints::default())
        .await
        .unwrap();
    assert_eq!(wait_for_terminal(&h.manager, &next).await.status, JobStatus::Completed);
}

// ---------------------------------------------------------------------------
// Direct execution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_execute_missing_and_superseded() {
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PrefixAnalyzer::default()),
    );

    let missing = h.manager.execute(&JobId::from_string("nope")).await;
    assert_eq!(missing, AttemptOutcome::Missing);

    let mut record = JobRecord::new(
        Strategy::AnalyzeOnly,
        InputRef::Text(TRANSCRIPT.into()),
        Hints::default(),
    );
    record.start_processing().unwrap();
    record.set_analysis("done");
    record.complete().unwrap();
    h.store.put(&record, None).await.unwrap();

    assert_eq!(h.manager.execute(&record.job_id).await, AttemptOutcome::Superseded);
    let stored = h.store.get(&record.job_id).await.unwrap().unwrap();
    assert_eq!(stored, record);
}

#[tokio::test]
async fn test_execute_claims_queued_record() {
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PrefixAnalyzer::default()),
    );

    let record = JobRecord::new(
        Strategy::AnalyzeOnly,
        InputRef::Text(TRANSCRIPT.into()),
        Hints::default(),
    );
    h.store.put(&record, None).await.unwrap();

    assert_eq!(h.manager.execute(&record.job_id).await, AttemptOutcome::Completed);
    // A second delivery of the same job does nothing
    assert_eq!(h.manager.execute(&record.job_id).await, AttemptOutcome::Superseded);
}

// ---------------------------------------------------------------------------
// Reset
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_reset_completed_job_reexecutes() {
    let analyzer = Arc::new(PrefixAnalyzer::default());
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        analyzer.clone(),
    );

    let job_id = h
        .manager
        .submit(
            SubmissionInput::Text(TRANSCRIPT.into()),
            Strategy::AnalyzeOnly,
            Hints::default(),
        )
        .await
        .unwrap();
    let done = wait_for_terminal(&h.manager, &job_id).await;
    assert_eq!(done.status, JobStatus::Completed);

    let reset = h.manager.reset(&job_id).await.unwrap();
    assert_eq!(reset.status, JobStatus::Queued);
    assert_eq!(reset.progress, 0);
    assert_eq!(reset.analysis_text, None);
    assert_eq!(reset.error_detail, None);
    assert_eq!(reset.completed_at, None);

    let again = wait_for_terminal(&h.manager, &job_id).await;
    assert_eq!(again.status, JobStatus::Completed);
    assert_eq!(again.attempts, 1);
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_reset_completed_upload_needs_new_upload() {
    let transcriber = Arc::new(ScriptedTranscriber::new(TRANSCRIPT));
    let h = harness(
        test_config(),
        transcriber.clone(),
        Arc::new(PrefixAnalyzer::default()),
    );

    let job_id = h
        .manager
        .submit(upload(), Strategy::TranscribeOnly, Hints::default())
        .await
        .unwrap();
    assert_eq!(wait_for_terminal(&h.manager, &job_id).await.status, JobStatus::Completed);
    assert!(h.blobs.is_empty().await);

    let reset = h.manager.reset(&job_id).await.unwrap();
    assert_eq!(reset.status, JobStatus::Queued);

    // The upload went with the first run, so the rerun cannot transcribe
    let again = wait_for_terminal(&h.manager, &job_id).await;
    assert_eq!(again.status, JobStatus::Failed);
    assert_eq!(again.error_detail.unwrap().kind, ErrorKind::InvalidInput);
    assert_eq!(again.attempts, 1);
    assert_eq!(transcriber.calls(), 1);
}

#[tokio::test]
async fn test_reset_completed_upload_reruns_when_inputs_kept() {
    let transcriber = Arc::new(ScriptedTranscriber::new(TRANSCRIPT));
    let h = harness(
        LifecycleConfig {
            release_inputs: false,
            ..test_config()
        },
        transcriber.clone(),
        Arc::new(PrefixAnalyzer::default()),
    );

    let job_id = h
        .manager
        .submit(upload(), Strategy::TranscribeOnly, Hints::default())
        .await
        .unwrap();
    assert_eq!(wait_for_terminal(&h.manager, &job_id).await.status, JobStatus::Completed);
    assert!(!h.blobs.is_empty().await);

    h.manager.reset(&job_id).await.unwrap();
    let again = wait_for_terminal(&h.manager, &job_id).await;
    assert_eq!(again.status, JobStatus::Completed);
    assert_eq!(again.result_text.as_deref(), Some(TRANSCRIPT));
    assert_eq!(transcriber.calls(), 2);
}

#[tokio::test]
async fn test_reset_before_ack_publishes_new_message() {
    let queue = Arc::new(RecordingQueue::default());
    let manager = JobLifecycleManager::new(
        test_config(),
        Arc::new(MemoryJobStore::new()),
        Arc::new(MemoryBlobStore::new()),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PrefixAnalyzer::default()),
        Dispatcher::Queue(queue.clone()),
    );

    let job_id = manager
        .submit(
            SubmissionInput::Text(TRANSCRIPT.into()),
            Strategy::AnalyzeOnly,
            Hints::default(),
        )
        .await
        .unwrap();
    let first = queue.published()[0].clone();

    // The worker settles the job but has not acknowledged its message yet
    assert_eq!(manager.run_job(job_id.clone()).await, AttemptOutcome::Completed);
    let reset = manager.reset(&job_id).await.unwrap();
    assert_eq!(reset.status, JobStatus::Queued);

    let published = queue.published();
    assert_eq!(published.len(), 2);
    assert_ne!(published[1].revision, first.revision);
    queue.ack(&first);

    let rerun = published[1].clone();
    assert_eq!(rerun.job_id, job_id);
    assert_eq!(manager.run_job(rerun.job_id).await, AttemptOutcome::Completed);
    // Redelivering the acknowledged first message does nothing
    assert_eq!(manager.run_job(first.job_id).await, AttemptOutcome::Superseded);
}

#[tokio::test]
async fn test_reset_failed_job_clears_error() {
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PrefixAnalyzer::default()),
    );

    let mut record = JobRecord::new(
        Strategy::AnalyzeOnly,
        InputRef::Text(TRANSCRIPT.into()),
        Hints::default(),
    );
    record.start_processing().unwrap();
    record
        .fail(scribe_models::ErrorDetail::analysis_failed())
        .unwrap();
    h.store.put(&record, Some(Duration::from_secs(3600))).await.unwrap();

    h.manager.reset(&record.job_id).await.unwrap();
    let view = wait_for_terminal(&h.manager, &record.job_id).await;
    assert_eq!(view.status, JobStatus::Completed);
    assert!(view.error_detail.is_none());
}

#[tokio::test]
async fn test_reset_unknown_and_live_jobs() {
    let release = Arc::new(Notify::new());
    let h = harness(
        test_config(),
        Arc::new(BlockingTranscriber {
            release: release.clone(),
        }),
        Arc::new(PrefixAnalyzer::default()),
    );

    let err = h.manager.reset(&JobId::from_string("unknown")).await.unwrap_err();
    assert!(matches!(err, JobError::NotFound(_)));

    let job_id = h
        .manager
        .submit(upload(), Strategy::TranscribeOnly, Hints::default())
        .await
        .unwrap();
    let err = h.manager.reset(&job_id).await.unwrap_err();
    assert!(matches!(err, JobError::Conflict(_)));

    release.notify_one();
    wait_for_terminal(&h.manager, &job_id).await;
}

#[tokio::test]
async fn test_reset_fresh_processing_record_conflicts() {
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PrefixAnalyzer::default()),
    );

    // Processing elsewhere, heartbeat fresh
    let mut record = JobRecord::new(
        Strategy::AnalyzeOnly,
        InputRef::Text(TRANSCRIPT.into()),
        Hints::default(),
    );
    record.start_processing().unwrap();
    h.store.put(&record, None).await.unwrap();

    let err = h.manager.reset(&record.job_id).await.unwrap_err();
    assert!(matches!(err, JobError::Conflict(_)));
}

// ---------------------------------------------------------------------------
// Watchdog and cleanup
// ---------------------------------------------------------------------------

fn stalled_record() -> JobRecord {
    let mut record = JobRecord::new(
        Strategy::AnalyzeOnly,
        InputRef::Text(TRANSCRIPT.into()),
        Hints::default(),
    );
    record.start_processing().unwrap();
    record.updated_at = Utc::now() - chrono::Duration::minutes(20);
    record
}

#[tokio::test]
async fn test_watchdog_fails_stalled_job() {
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PrefixAnalyzer::default()),
    );
    let record = stalled_record();
    h.store.put(&record, None).await.unwrap();

    let overview = h.manager.overview().await.unwrap();
    assert_eq!(overview.processing, 1);
    assert_eq!(overview.stuck.len(), 1);

    let report = Watchdog::new(h.manager.clone()).check_once().await.unwrap();
    assert_eq!(report.stalled, 1);
    assert_eq!(report.failed, 1);

    let view = h.manager.get_status(&record.job_id).await.unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    let detail = view.error_detail.unwrap();
    assert_eq!(detail.kind, ErrorKind::Timeout);
    assert!(detail.message.contains("stopped responding"));
}

#[tokio::test]
async fn test_watchdog_auto_reset_requeues_stalled_job() {
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PrefixAnalyzer::default()),
    );
    let record = stalled_record();
    h.store.put(&record, None).await.unwrap();

    let report = Watchdog::new(h.manager.clone())
        .with_auto_reset(true)
        .check_once()
        .await
        .unwrap();
    assert_eq!(report.requeued, 1);

    let view = wait_for_terminal(&h.manager, &record.job_id).await;
    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.attempts, 2);
}

#[tokio::test]
async fn test_watchdog_ignores_healthy_jobs() {
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PrefixAnalyzer::default()),
    );
    let mut record = JobRecord::new(
        Strategy::AnalyzeOnly,
        InputRef::Text(TRANSCRIPT.into()),
        Hints::default(),
    );
    record.start_processing().unwrap();
    h.store.put(&record, None).await.unwrap();

    let report = Watchdog::new(h.manager.clone()).check_once().await.unwrap();
    assert_eq!(report.stalled, 0);
    let view = h.manager.get_status(&record.job_id).await.unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Processing);
}

#[tokio::test]
async fn test_cleanup_expired_removes_old_jobs_and_inputs() {
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PrefixAnalyzer::default()),
    );

    let key = "uploads/old-set.mp3";
    h.blobs.put(key, vec![1, 2, 3], "audio/mpeg").await.unwrap();
    let mut old = JobRecord::new(
        Strategy::TranscribeOnly,
        InputRef::Blob(key.into()),
        Hints::default(),
    )
    .with_temporary_input(true);
    old.start_processing().unwrap();
    old.fail(scribe_models::ErrorDetail::transcription_failed()).unwrap();
    old.completed_at = Some(Utc::now() - chrono::Duration::hours(2));
    h.store.put(&old, None).await.unwrap();

    let mut recent = JobRecord::new(
        Strategy::AnalyzeOnly,
        InputRef::Text(TRANSCRIPT.into()),
        Hints::default(),
    );
    recent.start_processing().unwrap();
    recent.complete().unwrap();
    h.store.put(&recent, None).await.unwrap();

    let report = h.manager.cleanup_expired(Duration::from_secs(3600)).await.unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.inputs_released, 1);
    assert!(h.manager.get_status(&old.job_id).await.unwrap().is_none());
    assert!(h.manager.get_status(&recent.job_id).await.unwrap().is_some());
    assert!(!h.blobs.contains(key).await);
}

#[tokio::test]
async fn test_resume_queued_dispatches_orphans() {
    let h = harness(
        test_config(),
        Arc::new(ScriptedTranscriber::new(TRANSCRIPT)),
        Arc::new(PrefixAnalyzer::default()),
    );
    let record = JobRecord::new(
        Strategy::AnalyzeOnly,
        InputRef::Text(TRANSCRIPT.into()),
        Hints::default(),
    );
    h.store.put(&record, None).await.unwrap();

    assert_eq!(h.manager.resume_queued().await.unwrap(), 1);
    let view = wait_for_terminal(&h.manager, &record.job_id).await;
    assert_eq!(view.status, JobStatus::Completed);
}
