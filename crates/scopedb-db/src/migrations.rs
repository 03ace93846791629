//! Schema setup for the session store.
//!
//! The schema ships as SQL files compiled into the binary. Applied names are
//! recorded in `_scopedb_migrations`; a file runs once per database.

use rusqlite::Connection;
use thiserror::Error;

use crate::pool::DbPool;

/// One schema step.
struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// Schema steps in the order they run.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_init",
        sql: include_str!("migrations/000_init.sql"),
    },
    Migration {
        name: "001_users",
        sql: include_str!("migrations/001_users.sql"),
    },
];

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),

    /// Could not check a connection out of the pool.
    #[error("failed to acquire connection for migrations: {0}")]
    Connection(#[from] r2d2::Error),
}

/// Runs all pending migrations against the given connection.
///
/// # Errors
///
/// Returns `MigrationError` if any migration fails to execute or if the
/// migration tracking table cannot be queried.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    run_migrations_from_list(conn, MIGRATIONS)
}

/// Brings the schema behind `pool` up to date.
///
/// Convenience for application startup and tests: checks out one connection
/// and runs [`run_migrations`] on it.
pub fn create_all(pool: &DbPool) -> Result<usize, MigrationError> {
    let conn = pool.get()?;
    let applied = run_migrations(&conn)?;
    if applied > 0 {
        tracing::info!(count = applied, "applied database migrations");
    }
    Ok(applied)
}

const TRACKING_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS _scopedb_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
)";

fn run_migrations_from_list(
    conn: &Connection,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    conn.execute_batch(TRACKING_TABLE_SQL)
        .map_err(|source| MigrationError::ExecutionFailed {
            name: "_scopedb_migrations".to_string(),
            source,
        })?;

    let mut applied = 0;
    for migration in migrations {
        if is_applied(conn, migration.name)? {
            tracing::debug!(migration = migration.name, "skipping applied migration");
            continue;
        }
        apply(conn, migration).map_err(|source| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source,
        })?;
        applied += 1;
    }
    Ok(applied)
}

fn is_applied(conn: &Connection, name: &str) -> Result<bool, MigrationError> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM _scopedb_migrations WHERE name = ?1)",
        [name],
        |row| row.get(0),
    )
    .map_err(MigrationError::StateQuery)
}

/// Runs one migration and records it in a single transaction.
fn apply(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    tracing::info!(migration = migration.name, "applying migration");
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _scopedb_migrations (name) VALUES (?1)",
        [migration.name],
    )?;
    tx.commit()
}
