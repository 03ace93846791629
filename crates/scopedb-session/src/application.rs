//! The owning context shared by all handler instances.

use std::future::Future;

use crate::error::ExecutorError;
use crate::executor::WorkerPool;
use crate::settings::Settings;

/// Application-wide state: the settings mapping and the worker pool.
///
/// Built once at startup and shared behind an `Arc` by every handler
/// instance.
#[derive(Debug, Default)]
pub struct Application {
    settings: Settings,
    workers: WorkerPool,
}

impl Application {
    /// Creates an application with a default-sized worker pool.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            workers: WorkerPool::default(),
        }
    }

    pub fn with_workers(settings: Settings, workers: WorkerPool) -> Self {
        Self { settings, workers }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Replaces the worker pool with one bounded to `max_workers`.
    ///
    /// Clones of the previous pool keep their old bound.
    pub fn set_max_workers(&mut self, max_workers: usize) {
        self.workers = WorkerPool::new(max_workers);
    }

    /// Runs a blocking callable on the application's worker pool.
    ///
    /// For code that has no handler instance at hand, e.g. startup tasks.
    pub fn as_future<F, T>(&self, job: F) -> impl Future<Output = Result<T, ExecutorError>> + Send + 'static
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.workers.spawn(job)
    }
}
