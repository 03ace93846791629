//! Session factory and its lifetime counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use scopedb_db::{create_pool, DbPool, DbRuntimeSettings, PoolError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{ExecutorError, SessionError};
use crate::session::Session;

/// Counts sessions created and closed by one factory.
#[derive(Debug, Default)]
pub struct SessionStats {
    created: AtomicU64,
    closed: AtomicU64,
}

impl SessionStats {
    pub(crate) fn record_created(&self) {
        self.created.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_closed(&self) {
        self.closed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            created: self.created.load(Ordering::Acquire),
            closed: self.closed.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStatsSnapshot {
    pub created: u64,
    pub closed: u64,
}

impl SessionStatsSnapshot {
    /// Sessions created but not yet closed.
    pub fn open(&self) -> u64 {
        self.created.saturating_sub(self.closed)
    }
}

/// Produces a new [`Session`] on every call.
///
/// Shared read-only by every handler instance of an application. Async
/// scopes take a checkout permit before asking a worker for a connection;
/// there are as many permits as the pool has connections, so a worker never
/// sits in `pool.get()` waiting on another async scope.
pub struct SessionFactory {
    pool: DbPool,
    checkouts: Arc<Semaphore>,
    stats: Arc<SessionStats>,
}

impl SessionFactory {
    pub fn new(pool: DbPool) -> Self {
        let capacity = (pool.max_size() as usize).max(1);
        Self {
            pool,
            checkouts: Arc::new(Semaphore::new(capacity)),
            stats: Arc::new(SessionStats::default()),
        }
    }

    /// Waits until the pool has room for one more async scope.
    pub(crate) async fn reserve_checkout(&self) -> Result<OwnedSemaphorePermit, SessionError> {
        // Only a closed semaphore fails, and this one is never closed.
        Arc::clone(&self.checkouts)
            .acquire_owned()
            .await
            .map_err(|_| SessionError::Executor(ExecutorError::ShutDown))
    }

    /// Checks out a connection and wraps it in a fresh session.
    ///
    /// Blocks while the pool has no idle connection. Pool errors are passed
    /// through unchanged.
    pub fn make_session(&self) -> Result<Session, SessionError> {
        let conn = self.pool.get()?;
        Ok(Session::open(conn, Arc::clone(&self.stats)))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn stats(&self) -> SessionStatsSnapshot {
        self.stats.snapshot()
    }
}

impl fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("pool_max_size", &self.pool.max_size())
            .field("free_checkouts", &self.checkouts.available_permits())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

/// Builds a pool for the SQLite database at `db_path` and wraps it in a
/// [`SessionFactory`].
///
/// # Errors
///
/// Returns `PoolError` if the pool cannot be created.
pub fn make_session_factory(
    db_path: &str,
    settings: DbRuntimeSettings,
) -> Result<SessionFactory, PoolError> {
    Ok(SessionFactory::new(create_pool(db_path, settings)?))
}
