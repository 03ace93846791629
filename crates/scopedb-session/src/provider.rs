//! Per-handler session provider and the `SessionMixin` trait.

use std::future::Future;
use std::sync::Arc;

use crate::application::Application;
use crate::error::{MissingFactoryError, SessionError};
use crate::factory::SessionFactory;
use crate::scope::{AsyncSessionScope, ScopeLease, SessionScope};
use crate::session::Session;
use crate::settings::{Settings, SESSION_FACTORY_KEY};

/// Looks up the session factory in `settings`.
///
/// # Errors
///
/// `SessionError::MissingFactory` if the key is absent,
/// `SessionError::InvalidFactory` if it holds something else.
pub fn resolve_factory(settings: &Settings) -> Result<Arc<SessionFactory>, SessionError> {
    let value = settings.get_raw(SESSION_FACTORY_KEY).ok_or(MissingFactoryError {
        key: SESSION_FACTORY_KEY,
    })?;
    Arc::clone(value)
        .downcast::<SessionFactory>()
        .map_err(|_| SessionError::InvalidFactory {
            key: SESSION_FACTORY_KEY,
        })
}

/// Session access for one handler instance.
///
/// Holds at most one cached session, created on first use of
/// [`SessionProvider::session`]. Scoped sessions are independent of it.
#[derive(Debug)]
pub struct SessionProvider {
    application: Arc<Application>,
    cached: Option<Session>,
}

impl SessionProvider {
    pub fn new(application: Arc<Application>) -> Self {
        Self {
            application,
            cached: None,
        }
    }

    pub fn application(&self) -> &Arc<Application> {
        &self.application
    }

    pub fn resolve_factory(&self) -> Result<Arc<SessionFactory>, SessionError> {
        resolve_factory(self.application.settings())
    }

    /// The instance's cached session, created on first access.
    ///
    /// Every later call returns the same session, even after it was closed.
    pub fn session(&mut self) -> Result<&mut Session, SessionError> {
        let session = match self.cached.take() {
            Some(session) => session,
            None => self.resolve_factory()?.make_session()?,
        };
        Ok(self.cached.insert(session))
    }

    /// The cached session if one has been created.
    pub fn cached_session(&self) -> Option<&Session> {
        self.cached.as_ref()
    }

    /// Opens a fresh session in a synchronous scope.
    pub fn make_session(&self) -> Result<SessionScope, SessionError> {
        let session = self.resolve_factory()?.make_session()?;
        Ok(SessionScope::new(session))
    }

    /// Runs `body` in a synchronous scope: commits if it returns `Ok`, rolls
    /// back if it returns `Err`, closes in both cases.
    pub fn with_session<F, T, E>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut Session) -> Result<T, E>,
        E: From<SessionError>,
    {
        let mut scope = self.make_session()?;
        let outcome = body(&mut *scope);
        scope.finish(outcome)
    }

    /// Opens a fresh session in an asynchronous scope.
    ///
    /// The factory is resolved when the returned future is polled, so a
    /// missing factory surfaces at this await point. Waits for a free pool
    /// connection, then for a free worker, and creates the session on that
    /// worker. The scope keeps both until it ends.
    pub fn async_make_session(
        &self,
    ) -> impl Future<Output = Result<AsyncSessionScope, SessionError>> + Send + 'static {
        let factory = self.resolve_factory();
        let workers = self.application.workers().clone();
        async move {
            let factory = factory?;
            let checkout = factory.reserve_checkout().await?;
            let worker = workers.reserve().await?;
            let lease = workers
                .run_reserved(move || {
                    let session = factory.make_session()?;
                    Ok::<_, SessionError>(ScopeLease::new(session, worker, checkout))
                })
                .await??;
            Ok(AsyncSessionScope::new(lease, workers))
        }
    }

    /// Runs a blocking callable on the worker pool.
    ///
    /// The callable's `Ok` or `Err` is returned unchanged; a panic inside it
    /// is resumed on the awaiting task.
    pub fn run_in_executor<F, T, E>(&self, job: F) -> impl Future<Output = Result<T, E>> + Send + 'static
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<SessionError> + Send + 'static,
    {
        let pending = self.application.workers().spawn(job);
        async move {
            match pending.await {
                Ok(result) => result,
                Err(err) => Err(E::from(SessionError::from(err))),
            }
        }
    }

    /// End-of-request hook: commits and closes the cached session if one
    /// was created. Does nothing otherwise.
    pub fn finish_request(&mut self) -> Result<(), SessionError> {
        let Some(session) = self.cached.as_mut() else {
            return Ok(());
        };
        if session.is_closed() {
            return Ok(());
        }
        let committed = session.commit();
        let closed = session.close();
        committed.and(closed)
    }
}

/// Session access for handler types.
///
/// A handler owns a [`SessionProvider`] and exposes it through the two
/// required methods; everything else has a default implementation.
pub trait SessionMixin {
    fn sessions(&self) -> &SessionProvider;

    fn sessions_mut(&mut self) -> &mut SessionProvider;

    /// See [`SessionProvider::session`].
    fn session(&mut self) -> Result<&mut Session, SessionError> {
        self.sessions_mut().session()
    }

    /// See [`SessionProvider::make_session`].
    fn make_session(&self) -> Result<SessionScope, SessionError> {
        self.sessions().make_session()
    }

    /// See [`SessionProvider::with_session`].
    fn with_session<F, T, E>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut Session) -> Result<T, E>,
        E: From<SessionError>,
    {
        self.sessions().with_session(body)
    }

    /// See [`SessionProvider::async_make_session`].
    fn async_make_session(
        &self,
    ) -> impl Future<Output = Result<AsyncSessionScope, SessionError>> + Send + 'static {
        self.sessions().async_make_session()
    }

    /// See [`SessionProvider::run_in_executor`].
    fn run_in_executor<F, T, E>(&self, job: F) -> impl Future<Output = Result<T, E>> + Send + 'static
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<SessionError> + Send + 'static,
    {
        self.sessions().run_in_executor(job)
    }

    /// See [`SessionProvider::finish_request`].
    fn finish_request(&mut self) -> Result<(), SessionError> {
        self.sessions_mut().finish_request()
    }
}
