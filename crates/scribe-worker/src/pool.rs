//! Bounded worker pool with per-job cancellation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use scribe_models::JobId;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::metrics;

type Registry = Arc<Mutex<HashMap<JobId, CancellationToken>>>;

/// Limits concurrent attempts and tracks which jobs run in this process.
///
/// A job is registered for its whole run (all attempts and backoffs), while
/// a permit is held only during an attempt.
#[derive(Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
    active: Registry,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            active: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        // A poisoned map is still consistent: entries are only inserted or removed
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a job as running here. Returns `None` if it already is, or
    /// if the pool is shutting down.
    pub fn register(&self, job_id: &JobId) -> Option<ActiveJob> {
        if self.shutdown.is_cancelled() {
            return None;
        }
        let mut active = self.registry();
        if active.contains_key(job_id) {
            return None;
        }
        let token = self.shutdown.child_token();
        active.insert(job_id.clone(), token.clone());
        metrics::set_active_jobs(active.len());
        Some(ActiveJob {
            job_id: job_id.clone(),
            token,
            registry: Arc::clone(&self.active),
        })
    }

    pub fn is_active(&self, job_id: &JobId) -> bool {
        self.registry().contains_key(job_id)
    }

    pub fn active_count(&self) -> usize {
        self.registry().len()
    }

    /// Cancel one job. Returns whether it was running here.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.registry().get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait for a free slot. `None` once the pool is shut down.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).acquire_owned().await.ok()
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled when the pool shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run a job task on the pool's tracker.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(fut);
    }

    /// Cancel every job and wait up to `grace` for their tasks to finish.
    pub async fn shutdown(&self, grace: Duration) {
        info!("Shutting down worker pool ({} active jobs)", self.active_count());
        self.shutdown.cancel();
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!("Worker pool did not drain within {:?}", grace);
        }
        self.permits.close();
    }
}

/// Registration of a job running in this process. Dropping it unregisters
/// the job.
#[derive(Debug)]
pub struct ActiveJob {
    job_id: JobId,
    token: CancellationToken,
    registry: Registry,
}

impl ActiveJob {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        let mut active = self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        active.remove(&self.job_id);
        metrics::set_active_jobs(active.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_exclusive() {
        let pool = WorkerPool::new(2);
        let job_id = JobId::from_string("a");

        let guard = pool.register(&job_id).unwrap();
        assert!(pool.is_active(&job_id));
        assert!(pool.register(&job_id).is_none());

        drop(guard);
        assert!(!pool.is_active(&job_id));
        assert!(pool.register(&job_id).is_some());
    }

    #[test]
    fn test_cancel_reaches_job_token() {
        let pool = WorkerPool::new(1);
        let job_id = JobId::from_string("a");
        let guard = pool.register(&job_id).unwrap();

        assert!(pool.cancel(&job_id));
        assert!(guard.token().is_cancelled());
        assert!(!pool.cancel(&JobId::from_string("other")));
    }

    #[tokio::test]
    async fn test_permits_bound_concurrency() {
        let pool = WorkerPool::new(2);
        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.available_permits(), 0);
        drop(a);
        assert_eq!(pool.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_and_refuses() {
        let pool = WorkerPool::new(1);
        let job_id = JobId::from_string("a");
        let guard = pool.register(&job_id).unwrap();
        let token = guard.token().clone();

        pool.spawn(async move {
            token.cancelled().await;
            drop(guard);
        });
        pool.shutdown(Duration::from_secs(1)).await;

        assert!(pool.is_shutting_down());
        assert_eq!(pool.active_count(), 0);
        assert!(pool.register(&JobId::from_string("b")).is_none());
        assert!(pool.acquire().await.is_none());
    }
}
