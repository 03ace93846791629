//! Shared fixtures for scopedb-session integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use rusqlite::{params, Connection, Row};
use scopedb_db::{create_all, DbRuntimeSettings};
use scopedb_session::{make_session_factory, Application, Model, Settings, WorkerPool};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
}

impl User {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
        }
    }
}

impl Model for User {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static str = "username";

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute("INSERT INTO users (username) VALUES (?1)", params![self.username])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            username: row.get(0)?,
        })
    }
}

/// An application whose settings carry a factory for a fresh, migrated
/// database. Keep the `TempDir` alive for the duration of the test.
pub fn app_with_factory() -> (TempDir, Arc<Application>) {
    app_with_limits(DbRuntimeSettings::default(), 4)
}

/// Like [`app_with_factory`] with explicit pool settings and worker count.
pub fn app_with_limits(db: DbRuntimeSettings, max_workers: usize) -> (TempDir, Arc<Application>) {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("mixin.db");
    let factory = make_session_factory(path.to_str().unwrap(), db).expect("factory should build");
    create_all(factory.pool()).expect("migrations should succeed");

    let settings = Settings::new().with_session_factory(factory);
    let app = Application::with_workers(settings, WorkerPool::new(max_workers));
    (dir, Arc::new(app))
}

/// An application with an empty settings mapping.
pub fn app_without_factory() -> Arc<Application> {
    Arc::new(Application::new(Settings::new()))
}
