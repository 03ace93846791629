//! Bounded worker pool for blocking session work.
//!
//! Jobs run on tokio's blocking thread pool, never on the thread driving the
//! event loop. A semaphore bounds how many jobs from one pool run at once, so
//! a burst of requests cannot check out more sessions than there are workers.
//!
//! A caller that issues a series of jobs against the same state (an async
//! session scope) reserves a [`WorkerSlot`] once and runs every job of the
//! series under it with [`WorkerPool::run_reserved`]. The slot is held between
//! jobs, so the series never queues behind work that is waiting on it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ExecutorError;

/// Upper bound on the default worker count.
const MAX_DEFAULT_WORKERS: usize = 32;

/// Number of workers used when none is configured.
///
/// Mirrors the usual thread-pool default of CPU count plus four, capped.
pub fn default_max_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus + 4).min(MAX_DEFAULT_WORKERS)
}

struct WorkerPoolInner {
    permits: Arc<Semaphore>,
    max_workers: usize,
    jobs_completed: AtomicU64,
}

/// One worker permit held across several jobs.
///
/// Released when dropped.
#[derive(Debug)]
pub(crate) struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}

/// Submission point for blocking callables.
///
/// Cheap to clone; clones share the same bound and counters.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<WorkerPoolInner>,
}

impl WorkerPool {
    /// Creates a pool that runs at most `max_workers` jobs concurrently.
    ///
    /// A value of zero is treated as one.
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            inner: Arc::new(WorkerPoolInner {
                permits: Arc::new(Semaphore::new(max_workers)),
                max_workers,
                jobs_completed: AtomicU64::new(0),
            }),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    /// Number of jobs that ran to completion on this pool.
    pub fn jobs_completed(&self) -> u64 {
        self.inner.jobs_completed.load(Ordering::Acquire)
    }

    /// Stops accepting jobs. Jobs already running finish normally.
    pub fn shutdown(&self) {
        self.inner.permits.close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.permits.is_closed()
    }

    /// Runs `job` on a blocking worker thread and yields its return value.
    ///
    /// The returned future does not borrow the pool. If `job` panics, the
    /// panic is resumed on the awaiting task. If the awaiting task is dropped
    /// while the job is running, the job still runs to completion and its
    /// result (including any session it owns) is dropped on the worker.
    ///
    /// # Errors
    ///
    /// `ExecutorError::ShutDown` if the pool was shut down,
    /// `ExecutorError::Cancelled` if the runtime cancelled the job.
    pub fn spawn<F, T>(&self, job: F) -> impl Future<Output = Result<T, ExecutorError>> + Send + 'static
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        async move {
            let permit = Arc::clone(&inner.permits)
                .acquire_owned()
                .await
                .map_err(|_| ExecutorError::ShutDown)?;
            run_blocking(inner, move || {
                let _permit = permit;
                job()
            })
            .await
        }
    }

    /// Reserves a worker for a series of [`WorkerPool::run_reserved`] jobs.
    ///
    /// Waits while every worker is taken.
    ///
    /// # Errors
    ///
    /// `ExecutorError::ShutDown` if the pool was shut down.
    pub(crate) async fn reserve(&self) -> Result<WorkerSlot, ExecutorError> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| ExecutorError::ShutDown)?;
        Ok(WorkerSlot { _permit: permit })
    }

    /// Runs `job` without taking a permit.
    ///
    /// The caller must own a [`WorkerSlot`] for the duration of the job;
    /// moving the slot into `job` keeps the bound intact when the awaiting
    /// task is dropped early. Runs after [`WorkerPool::shutdown`] too, so
    /// reserved series can finish.
    pub(crate) fn run_reserved<F, T>(
        &self,
        job: F,
    ) -> impl Future<Output = Result<T, ExecutorError>> + Send + 'static
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        run_blocking(Arc::clone(&self.inner), job)
    }
}

async fn run_blocking<F, T>(inner: Arc<WorkerPoolInner>, job: F) -> Result<T, ExecutorError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(move || {
        let output = job();
        inner.jobs_completed.fetch_add(1, Ordering::AcqRel);
        output
    });

    match handle.await {
        Ok(output) => Ok(output),
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Err(ExecutorError::Cancelled),
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(default_max_workers())
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("max_workers", &self.inner.max_workers)
            .field("available", &self.inner.permits.available_permits())
            .field("jobs_completed", &self.jobs_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn spawn_runs_off_the_calling_thread() {
        let pool = WorkerPool::new(2);
        let caller = std::thread::current().id();

        let worker = pool
            .spawn(|| std::thread::current().id())
            .await
            .expect("job should run");

        assert_ne!(worker, caller);
        assert_eq!(pool.jobs_completed(), 1);
    }

    #[tokio::test]
    async fn spawn_passes_job_errors_through_unchanged() {
        let pool = WorkerPool::new(1);
        let result: Result<Result<(), String>, ExecutorError> =
            pool.spawn(|| Err("boom".to_string())).await;

        assert_eq!(result.expect("job should run"), Err("boom".to_string()));
    }

    #[tokio::test]
    #[should_panic(expected = "job exploded")]
    async fn spawn_resumes_job_panics() {
        let pool = WorkerPool::new(1);
        let _ = pool.spawn(|| panic!("job exploded")).await;
    }

    #[tokio::test]
    async fn shut_down_pool_rejects_jobs() {
        let pool = WorkerPool::new(1);
        pool.shutdown();

        let err = pool.spawn(|| ()).await.expect_err("pool is shut down");
        assert!(matches!(err, ExecutorError::ShutDown));
        assert!(pool.is_shut_down());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrency_is_bounded_by_max_workers() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<_> = (0..8)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                tokio::spawn(pool.spawn(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                }))
            })
            .collect();

        for job in jobs {
            job.await.expect("task should not panic").expect("job should run");
        }

        assert!(peak.load(Ordering::SeqCst) <= 2, "at most two jobs run at once");
        assert_eq!(pool.jobs_completed(), 8);
    }

    #[tokio::test]
    async fn reserved_slot_counts_against_the_bound() {
        let pool = WorkerPool::new(1);
        let slot = pool.reserve().await.expect("slot should be free");

        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.spawn(|| ())).await;
        assert!(blocked.is_err(), "spawn must wait for the reserved slot");

        let value = pool
            .run_reserved(move || {
                let _slot = slot;
                7
            })
            .await
            .expect("reserved job should run");
        assert_eq!(value, 7);

        pool.spawn(|| ()).await.expect("slot was released with the job");
        assert_eq!(pool.jobs_completed(), 2);
    }

    #[tokio::test]
    async fn reserved_jobs_run_after_shutdown() {
        let pool = WorkerPool::new(1);
        let slot = pool.reserve().await.expect("slot should be free");
        pool.shutdown();

        assert!(matches!(pool.reserve().await, Err(ExecutorError::ShutDown)));
        let done = pool.run_reserved(move || drop(slot)).await;
        assert!(done.is_ok(), "a reserved series may finish after shutdown");
    }

    #[test]
    fn zero_workers_is_clamped_to_one() {
        assert_eq!(WorkerPool::new(0).max_workers(), 1);
        assert!(default_max_workers() >= 1);
        assert!(default_max_workers() <= MAX_DEFAULT_WORKERS);
    }
}
