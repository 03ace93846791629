//! Error types for session acquisition and the worker bridge.

use crate::session::SessionId;

/// The owning application has no session factory configured.
///
/// This is a configuration error. It is never retried and never replaced by
/// a default factory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no session factory configured under settings key '{key}'")]
pub struct MissingFactoryError {
    /// The settings key that was looked up.
    pub key: &'static str,
}

/// Errors raised while submitting work to the [`WorkerPool`](crate::WorkerPool).
///
/// A panic inside a submitted job is not represented here: it is resumed on
/// the awaiting task with its original payload.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The worker pool was shut down before the job could start.
    #[error("worker pool is shut down")]
    ShutDown,

    /// The job was cancelled before it produced a result (runtime shutdown).
    #[error("blocking job was cancelled before completion")]
    Cancelled,
}

/// Errors that can occur while creating or driving a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No factory is stored under the `session_factory` settings key.
    #[error(transparent)]
    MissingFactory(#[from] MissingFactoryError),

    /// The `session_factory` key holds a value that is not a session factory.
    #[error("settings key '{key}' does not hold a session factory")]
    InvalidFactory {
        /// The settings key that was looked up.
        key: &'static str,
    },

    /// The factory could not check a connection out of its pool.
    #[error("failed to acquire database connection: {0}")]
    Pool(#[from] r2d2::Error),

    /// A statement issued by the session failed.
    #[error("session database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The session was used after `close()`.
    #[error("{0} is closed")]
    Closed(SessionId),

    /// An async scope no longer holds its session because an earlier
    /// operation on it was cancelled or panicked.
    #[error("async session scope has lost its session")]
    Detached,

    /// The blocking job could not be run on the worker pool.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

impl SessionError {
    /// Returns `true` for the missing-factory configuration error.
    pub fn is_missing_factory(&self) -> bool {
        matches!(self, SessionError::MissingFactory(_))
    }
}
