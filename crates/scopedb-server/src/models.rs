//! Persisted record types.

use rusqlite::{params, Connection, Row};
use scopedb_session::Model;
use serde::Serialize;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    /// Row id, `None` until the user has been inserted.
    pub id: Option<i64>,
    pub username: String,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: None,
            username: username.into(),
        }
    }
}

impl Model for User {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static str = "id, username";

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO users (username) VALUES (?1)",
            params![self.username],
        )
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            username: row.get(1)?,
        })
    }
}
