//! Nestable write scopes on a shared connection.
//!
//! # Invariants
//! - A savepoint that is neither committed nor rolled back is rolled back on drop.
//! - Savepoints opened outside a transaction start one; releasing the outermost
//!   savepoint commits it.

use super::DbResult;
use log::error;
use rusqlite::Connection;

/// RAII guard around `SAVEPOINT` / `RELEASE` / `ROLLBACK TO`.
///
/// Works on `&Connection`, so repositories that only borrow the connection can
/// still make multi-statement writes atomic.
pub struct Savepoint<'conn> {
    conn: &'conn Connection,
    name: &'static str,
    finished: bool,
}

impl<'conn> Savepoint<'conn> {
    /// Opens a savepoint named `name` (a plain SQL identifier).
    pub fn begin(conn: &'conn Connection, name: &'static str) -> DbResult<Self> {
        conn.execute_batch(&format!("SAVEPOINT {name};"))?;
        Ok(Self {
            conn,
            name,
            finished: false,
        })
    }

    /// Makes the savepoint's writes part of the enclosing scope (or commits).
    pub fn commit(mut self) -> DbResult<()> {
        self.finished = true;
        self.conn
            .execute_batch(&format!("RELEASE SAVEPOINT {};", self.name))?;
        Ok(())
    }

    /// Discards every write made since the savepoint was opened.
    pub fn rollback(mut self) -> DbResult<()> {
        self.finished = true;
        discard(self.conn, self.name)
    }
}

impl Drop for Savepoint<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = discard(self.conn, self.name) {
            error!(
                "event=savepoint_rollback module=db status=error savepoint={} error={}",
                self.name, err
            );
        }
    }
}

fn discard(conn: &Connection, name: &str) -> DbResult<()> {
    conn.execute_batch(&format!(
        "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name};"
    ))?;
    Ok(())
}
