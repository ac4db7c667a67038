//! SQLite storage bootstrap, schema migrations and savepoint scoping.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the model store.
//! - Apply core-table migrations in deterministic order.
//! - Provide nestable all-or-nothing write scopes.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - No store data is read or written before migrations succeed.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;
mod savepoint;

pub use open::{open_db, open_db_in_memory, open_db_with_timeout};
pub use savepoint::Savepoint;

pub type DbResult<T> = Result<T, DbError>;

/// Storage-layer failure: the relational engine or the byte source failed.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "i/o failure: {err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<std::io::Error> for DbError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Returns whether a table (or virtual table) with `name` exists.
pub fn table_exists(conn: &rusqlite::Connection, name: &str) -> DbResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [name],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
