//! Scoped sessions with guaranteed cleanup.
//!
//! Both scope types end the same way: a successful outcome commits, a failed
//! one rolls back, and the session is closed either way. A scope that is
//! dropped without being finished (early return, `?`, panic, cancelled
//! future) rolls back and closes.

use std::ops::{Deref, DerefMut};

use tokio::sync::OwnedSemaphorePermit;

use crate::error::SessionError;
use crate::executor::{WorkerPool, WorkerSlot};
use crate::session::Session;

/// Commits on `commit == true`, then closes. Close always runs.
fn end_session(session: &mut Session, commit: bool) -> Result<(), SessionError> {
    let committed = if commit { session.commit() } else { Ok(()) };
    let closed = session.close();
    committed.and(closed)
}

/// Merges the body's outcome with the cleanup result.
///
/// A body error wins over a cleanup error; the latter is only logged.
fn settle<T, E>(outcome: Result<T, E>, cleanup: Result<(), SessionError>) -> Result<T, E>
where
    E: From<SessionError>,
{
    match (outcome, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(E::from(err)),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup_err)) => {
            tracing::warn!(error = %cleanup_err, "session cleanup failed after scope error");
            Err(err)
        }
    }
}

/// A session owned by a synchronous scope.
///
/// Dereferences to [`Session`]. Finish it with [`SessionScope::finish`], or
/// let it drop to roll back and close.
#[derive(Debug)]
pub struct SessionScope {
    session: Session,
}

impl SessionScope {
    pub(crate) fn new(session: Session) -> Self {
        Self { session }
    }

    /// Ends the scope: commits on `Ok`, rolls back on `Err`, always closes.
    ///
    /// Returns `outcome` unchanged unless the commit or close fails after a
    /// successful body.
    pub fn finish<T, E>(self, outcome: Result<T, E>) -> Result<T, E>
    where
        E: From<SessionError>,
    {
        let mut session = self.session;
        let cleanup = end_session(&mut session, outcome.is_ok());
        settle(outcome, cleanup)
    }

    /// Commits and closes.
    pub fn close(self) -> Result<(), SessionError> {
        self.finish(Ok(()))
    }
}

impl Deref for SessionScope {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl DerefMut for SessionScope {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

/// What an async scope owns while it is open.
///
/// Fields drop in order: the session returns its connection before the
/// permits are released.
#[derive(Debug)]
pub(crate) struct ScopeLease {
    session: Session,
    _worker: WorkerSlot,
    _checkout: OwnedSemaphorePermit,
}

impl ScopeLease {
    pub(crate) fn new(session: Session, worker: WorkerSlot, checkout: OwnedSemaphorePermit) -> Self {
        Self {
            session,
            _worker: worker,
            _checkout: checkout,
        }
    }
}

/// A session owned by an asynchronous scope.
///
/// The session only ever runs on the worker pool: [`AsyncSessionScope::run`]
/// moves it onto a worker for one blocking call and moves it back. The scope
/// holds one worker slot and one pool checkout from creation until it is
/// finished or dropped, so its own `run`, `finish` and `close` never wait
/// behind other scopes.
#[derive(Debug)]
pub struct AsyncSessionScope {
    lease: Option<ScopeLease>,
    workers: WorkerPool,
}

impl AsyncSessionScope {
    pub(crate) fn new(lease: ScopeLease, workers: WorkerPool) -> Self {
        Self {
            lease: Some(lease),
            workers,
        }
    }

    /// Identity of the scoped session, or `None` if the scope lost it.
    pub fn session_id(&self) -> Option<crate::SessionId> {
        self.lease.as_ref().map(|lease| lease.session.id())
    }

    /// Runs `op` against the session on a worker thread.
    ///
    /// Errors from `op` reach the caller unchanged. If `op` panics the panic
    /// is resumed here and the session is closed on the worker; later calls
    /// then fail with `SessionError::Detached`.
    pub async fn run<F, T, E>(&mut self, op: F) -> Result<T, E>
    where
        F: FnOnce(&mut Session) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<SessionError> + Send + 'static,
    {
        let mut lease = self.lease.take().ok_or(SessionError::Detached)?;
        let (lease, result) = self
            .workers
            .run_reserved(move || {
                let result = op(&mut lease.session);
                (lease, result)
            })
            .await
            .map_err(SessionError::from)?;
        self.lease = Some(lease);
        result
    }

    /// Ends the scope on a worker thread: commits on `Ok`, rolls back on
    /// `Err`, always closes.
    pub async fn finish<T, E>(mut self, outcome: Result<T, E>) -> Result<T, E>
    where
        E: From<SessionError>,
    {
        let Some(lease) = self.lease.take() else {
            return settle(outcome, Err(SessionError::Detached));
        };
        let commit = outcome.is_ok();
        let cleanup = match self
            .workers
            .run_reserved(move || {
                let mut lease = lease;
                end_session(&mut lease.session, commit)
            })
            .await
        {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        };
        settle(outcome, cleanup)
    }

    /// Commits and closes on a worker thread.
    pub async fn close(self) -> Result<(), SessionError> {
        self.finish(Ok(())).await
    }
}

impl Drop for AsyncSessionScope {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        // Closing may block on I/O, so keep it off the event loop when a
        // runtime is available.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || drop(lease));
            }
            Err(_) => drop(lease),
        }
    }
}
