//! Unit tests for sessions, scopes and factory resolution.

use std::sync::Arc;

use rusqlite::{params, Connection, Row};
use scopedb_db::{create_all, DbRuntimeSettings};
use tempfile::TempDir;

use crate::{
    make_session_factory, resolve_factory, Application, Model, SessionError, SessionFactory,
    SessionProvider, Settings, SESSION_FACTORY_KEY,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Account {
    username: String,
}

impl Account {
    fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
        }
    }
}

impl Model for Account {
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

/// Creates a migrated on-disk database and a factory for it.
fn test_factory() -> (TempDir, SessionFactory) {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("session.db");
    let factory = make_session_factory(path.to_str().expect("utf-8 path"), DbRuntimeSettings::default())
        .expect("factory should build");
    create_all(factory.pool()).expect("migrations should succeed");
    (dir, factory)
}

fn provider_for(factory: SessionFactory) -> SessionProvider {
    let settings = Settings::new().with_session_factory(factory);
    SessionProvider::new(Arc::new(Application::new(settings)))
}

// ── Session ──────────────────────────────────────────────────────────

#[test]
fn session_begins_transaction_lazily() {
    let (_dir, factory) = test_factory();
    let mut session = factory.make_session().expect("session should open");

    assert!(!session.in_transaction());
    session.count::<Account>().expect("count should succeed");
    assert!(session.in_transaction());

    session.commit().expect("commit should succeed");
    assert!(!session.in_transaction());
}

#[test]
fn transaction_ended_by_sqlite_is_not_tracked_as_open() {
    let (_dir, factory) = test_factory();
    let mut session = factory.make_session().expect("session should open");

    session.add(&Account::new("lost")).expect("add should succeed");
    assert!(session.in_transaction());

    // End the transaction underneath the session, as SQLite does on its own
    // after some I/O and disk-full errors.
    session
        .connection()
        .expect("connection")
        .execute_batch("ROLLBACK")
        .expect("rollback should succeed");
    assert!(!session.in_transaction());
    session.commit().expect("commit with no open transaction is a no-op");

    session.add(&Account::new("kept")).expect("add should succeed");
    session.commit().expect("commit should succeed");
    let names: Vec<String> = session
        .all::<Account>()
        .expect("all should succeed")
        .into_iter()
        .map(|account| account.username)
        .collect();
    assert_eq!(names, vec!["kept".to_string()]);
}

#[test]
fn committed_rows_are_visible_to_other_sessions() {
    let (_dir, factory) = test_factory();

    let mut writer = factory.make_session().expect("writer should open");
    writer.add(&Account::new("alice")).expect("add should succeed");
    writer.commit().expect("commit should succeed");

    let mut reader = factory.make_session().expect("reader should open");
    assert_eq!(reader.count::<Account>().expect("count"), 1);
    assert_eq!(
        reader.all::<Account>().expect("all"),
        vec![Account::new("alice")]
    );
}

#[test]
fn close_rolls_back_uncommitted_work() {
    let (_dir, factory) = test_factory();

    let mut session = factory.make_session().expect("session should open");
    session
        .add_all(&[Account::new("a"), Account::new("b")])
        .expect("adds should succeed");
    session.close().expect("close should succeed");
    assert!(session.is_closed());

    let mut check = factory.make_session().expect("session should open");
    assert_eq!(check.count::<Account>().expect("count"), 0);
}

#[test]
fn closed_session_rejects_operations_and_close_is_idempotent() {
    let (_dir, factory) = test_factory();
    let mut session = factory.make_session().expect("session should open");
    let id = session.id();

    session.close().expect("first close should succeed");
    session.close().expect("second close is a no-op");

    match session.count::<Account>() {
        Err(SessionError::Closed(closed)) => assert_eq!(closed, id),
        other => panic!("expected Closed error, got {other:?}"),
    }
    assert_eq!(factory.stats().closed, 1, "close is only counted once");
}

#[test]
fn dropping_a_session_closes_it() {
    let (_dir, factory) = test_factory();
    {
        let mut session = factory.make_session().expect("session should open");
        session.add(&Account::new("dropped")).expect("add should succeed");
    }

    let stats = factory.stats();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.open(), 0);

    let mut check = factory.make_session().expect("session should open");
    assert_eq!(check.count::<Account>().expect("count"), 0);
}

#[test]
fn database_errors_pass_through_unchanged() {
    let (_dir, factory) = test_factory();
    let mut session = factory.make_session().expect("session should open");

    session.add(&Account::new("dup")).expect("first add should succeed");
    let err = session
        .add(&Account::new("dup"))
        .expect_err("duplicate should fail");

    match err {
        SessionError::Database(inner) => assert_eq!(
            inner.sqlite_error_code(),
            Some(rusqlite::ffi::ErrorCode::ConstraintViolation)
        ),
        other => panic!("expected Database error, got {other:?}"),
    }
}

// ── Factory resolution ───────────────────────────────────────────────

#[test]
fn resolve_factory_reports_missing_key() {
    let err = resolve_factory(&Settings::new()).expect_err("no factory configured");
    assert!(err.is_missing_factory());
    assert_eq!(
        err.to_string(),
        "no session factory configured under settings key 'session_factory'"
    );
}

#[test]
fn resolve_factory_rejects_wrong_type() {
    let mut settings = Settings::new();
    settings.insert(SESSION_FACTORY_KEY, "not a factory");

    let err = resolve_factory(&settings).expect_err("wrong type under key");
    assert!(matches!(err, SessionError::InvalidFactory { key } if key == SESSION_FACTORY_KEY));
}

#[test]
fn settings_get_downcasts_by_type() {
    let mut settings = Settings::new();
    settings.insert("answer", 42u32);

    assert_eq!(settings.get::<u32>("answer").as_deref(), Some(&42));
    assert!(settings.get::<String>("answer").is_none());
    assert!(settings.remove("answer"));
    assert!(settings.get::<u32>("answer").is_none());
    assert!(!settings.remove("answer"));
}

// ── Provider ─────────────────────────────────────────────────────────

#[test]
fn cached_session_is_created_once() {
    let (_dir, factory) = test_factory();
    let mut provider = provider_for(factory);

    let first = provider.session().expect("session").id();
    let second = provider.session().expect("session").id();

    assert_eq!(first, second);
    let stats = provider.resolve_factory().expect("factory").stats();
    assert_eq!(stats.created, 1);
}

#[test]
fn scoped_session_is_independent_of_cached_session() {
    let (_dir, factory) = test_factory();
    let mut provider = provider_for(factory);

    let cached = provider.session().expect("session").id();
    let scope = provider.make_session().expect("scope");
    assert_ne!(cached, scope.id());
    scope.close().expect("scope should close");

    assert_eq!(provider.cached_session().map(|s| s.id()), Some(cached));
}

#[test]
fn with_session_commits_on_ok() {
    let (_dir, factory) = test_factory();
    let provider = provider_for(factory);

    provider
        .with_session(|s| s.add(&Account::new("kept")))
        .expect("body should succeed");

    let count = provider
        .with_session(|s| s.count::<Account>())
        .expect("count should succeed");
    assert_eq!(count, 1);
}

#[test]
fn with_session_rolls_back_and_closes_on_err() {
    let (_dir, factory) = test_factory();
    let provider = provider_for(factory);

    let err = provider
        .with_session(|s| {
            s.add(&Account::new("discarded"))?;
            Err::<(), _>(SessionError::Detached)
        })
        .expect_err("body fails");
    assert!(matches!(err, SessionError::Detached));

    let stats = provider.resolve_factory().expect("factory").stats();
    assert_eq!(stats.open(), 0, "scope closed its session");

    let count = provider
        .with_session(|s| s.count::<Account>())
        .expect("count should succeed");
    assert_eq!(count, 0);
}

#[test]
fn scope_closes_session_when_body_panics() {
    let (_dir, factory) = test_factory();
    let provider = provider_for(factory);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        provider.with_session(|s| -> Result<(), SessionError> {
            s.add(&Account::new("panicked"))?;
            panic!("body exploded");
        })
    }));
    assert!(result.is_err());

    let stats = provider.resolve_factory().expect("factory").stats();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.open(), 0);
}

#[test]
fn finish_request_commits_cached_session() {
    let (_dir, factory) = test_factory();
    let mut provider = provider_for(factory);

    provider
        .session()
        .expect("session")
        .add(&Account::new("on-finish"))
        .expect("add should succeed");
    provider.finish_request().expect("finish should succeed");
    assert!(provider.cached_session().is_some_and(|s| s.is_closed()));

    let count = provider
        .with_session(|s| s.count::<Account>())
        .expect("count should succeed");
    assert_eq!(count, 1);
}

#[test]
fn finish_request_without_session_is_a_no_op() {
    let mut provider = SessionProvider::new(Arc::new(Application::new(Settings::new())));
    provider.finish_request().expect("nothing to finish");
    assert!(provider.cached_session().is_none());
}
