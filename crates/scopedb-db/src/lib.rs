//! Database layer for scopedb.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization
//! and embedded SQL migrations. Sessions handed out by `scopedb-session` each
//! own exactly one connection checked out of the pool built here.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: concurrent readers with a single writer, which
//!   matches a request-per-session workload.
//! - **`r2d2` connection pool**: bounded connection reuse. A session returns
//!   its connection to the pool when it is closed.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!` so the schema cannot drift from the code using it.

mod migrations;
mod pool;

pub use migrations::{create_all, run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError, PooledConnection};
