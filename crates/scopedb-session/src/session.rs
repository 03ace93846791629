//! The session: one pooled connection plus a lazily started transaction.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use rusqlite::{Connection, Row};
use scopedb_db::PooledConnection;

use crate::error::SessionError;
use crate::factory::SessionStats;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique session identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// A record type a [`Session`] can persist and load.
pub trait Model: Sized {
    /// Table the records live in.
    const TABLE: &'static str;

    /// Comma-separated column list matching [`Model::from_row`].
    const COLUMNS: &'static str;

    /// Inserts `self`, returning the number of affected rows.
    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize>;

    /// Decodes one row selected with [`Model::COLUMNS`].
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// A unit of work against the database.
///
/// Owns one connection checked out of the factory's pool. The first
/// statement issued through the session opens a transaction; `commit` and
/// `rollback` end it and the next statement opens a new one. `close` rolls
/// back anything uncommitted and returns the connection to the pool.
///
/// A session is `Send` but not `Sync`: it may move between threads, but only
/// one thread drives it at a time.
pub struct Session {
    id: SessionId,
    conn: Option<PooledConnection>,
    created_on: ThreadId,
    stats: Arc<SessionStats>,
}

impl Session {
    pub(crate) fn open(conn: PooledConnection, stats: Arc<SessionStats>) -> Self {
        let session = Self {
            id: SessionId::next(),
            conn: Some(conn),
            created_on: std::thread::current().id(),
            stats,
        };
        session.stats.record_created();
        tracing::debug!(session = %session.id, "session opened");
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Thread the session was created on.
    pub fn created_on(&self) -> ThreadId {
        self.created_on
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Whether a transaction is open and not yet committed or rolled back.
    ///
    /// Read from the connection itself, so a transaction SQLite ended on its
    /// own (disk full, I/O error) is reported as ended.
    pub fn in_transaction(&self) -> bool {
        self.conn
            .as_deref()
            .is_some_and(|conn| !conn.is_autocommit())
    }

    /// Returns the connection, opening a transaction if none is active.
    ///
    /// # Errors
    ///
    /// `SessionError::Closed` after `close()`; `SessionError::Database` if
    /// the transaction cannot be started.
    pub fn connection(&mut self) -> Result<&Connection, SessionError> {
        let conn: &Connection = self.conn.as_deref().ok_or(SessionError::Closed(self.id))?;
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        Ok(conn)
    }

    /// Inserts `record` and returns the new row id.
    pub fn add<M: Model>(&mut self, record: &M) -> Result<i64, SessionError> {
        let conn = self.connection()?;
        record.insert(conn)?;
        Ok(conn.last_insert_rowid())
    }

    /// Inserts every record in order, stopping at the first failure.
    pub fn add_all<'a, M, I>(&mut self, records: I) -> Result<Vec<i64>, SessionError>
    where
        M: Model + 'a,
        I: IntoIterator<Item = &'a M>,
    {
        records.into_iter().map(|record| self.add(record)).collect()
    }

    /// Number of rows in the model's table, as seen by this session.
    pub fn count<M: Model>(&mut self) -> Result<i64, SessionError> {
        let sql = format!("SELECT COUNT(*) FROM {}", M::TABLE);
        let count: i64 = self.connection()?.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }

    /// All rows of the model's table in insertion order.
    pub fn all<M: Model>(&mut self) -> Result<Vec<M>, SessionError> {
        let sql = format!("SELECT {} FROM {} ORDER BY rowid", M::COLUMNS, M::TABLE);
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| M::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Commits the active transaction, if any.
    pub fn commit(&mut self) -> Result<(), SessionError> {
        self.end_transaction("COMMIT")
    }

    /// Discards the active transaction, if any.
    pub fn rollback(&mut self) -> Result<(), SessionError> {
        self.end_transaction("ROLLBACK")
    }

    fn end_transaction(&mut self, statement: &str) -> Result<(), SessionError> {
        let conn: &Connection = self.conn.as_deref().ok_or(SessionError::Closed(self.id))?;
        if !conn.is_autocommit() {
            conn.execute_batch(statement)?;
        }
        Ok(())
    }

    /// Rolls back uncommitted work and returns the connection to the pool.
    ///
    /// Closing an already closed session is a no-op. The connection is
    /// released even if the rollback fails; the rollback error is returned.
    pub fn close(&mut self) -> Result<(), SessionError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };

        let rolled_back = if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")
        } else {
            Ok(())
        };

        drop(conn);
        self.stats.record_closed();
        tracing::debug!(session = %self.id, "session closed");

        rolled_back.map_err(SessionError::from)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.conn.is_some() {
            if let Err(err) = self.close() {
                tracing::warn!(session = %self.id, error = %err, "failed to close session on drop");
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}
