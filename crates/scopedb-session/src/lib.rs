//! Request-scoped database sessions for async handlers.
//!
//! Every handler instance gets its own [`Session`], created lazily from the
//! [`SessionFactory`] stored in its [`Application`]'s settings under
//! [`SESSION_FACTORY_KEY`]. Sessions wrap blocking SQLite connections, so
//! async code never drives them on the event loop: [`AsyncSessionScope`] and
//! [`SessionProvider::run_in_executor`] hand the work to a bounded
//! [`WorkerPool`] and await the result.
//!
//! # Acquisition paths
//!
//! | Path | Created | Ended |
//! |------|---------|-------|
//! | [`SessionProvider::session`] | first access, cached per instance | caller, or [`SessionProvider::finish_request`] |
//! | [`SessionProvider::make_session`] | on call | [`SessionScope::finish`] or drop |
//! | [`SessionProvider::async_make_session`] | on await, on a worker | [`AsyncSessionScope::finish`] or drop |
//!
//! Scopes commit on a successful finish and roll back otherwise. Every path
//! closes the session, including panics and dropped futures.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut scope = handler.async_make_session().await?;
//! let outcome = async {
//!     scope.run(|s| s.add(&User::new("alice"))).await?;
//!     scope.run(|s| s.count::<User>()).await
//! }
//! .await;
//! let count = scope.finish(outcome).await?;
//! ```

mod application;
mod error;
mod executor;
mod factory;
mod provider;
mod scope;
mod session;
mod settings;

pub use application::Application;
pub use error::{ExecutorError, MissingFactoryError, SessionError};
pub use executor::{default_max_workers, WorkerPool};
pub use factory::{make_session_factory, SessionFactory, SessionStats, SessionStatsSnapshot};
pub use provider::{resolve_factory, SessionMixin, SessionProvider};
pub use scope::{AsyncSessionScope, SessionScope};
pub use session::{Model, Session, SessionId};
pub use settings::{Settings, SESSION_FACTORY_KEY};

#[cfg(test)]
mod tests;
