mod schema;
mod queries;

use std::sync::{Mutex, MutexGuard};
use blamemux_types::{Result, SchemaStatus};
use rusqlite::{params, Connection};

/// SQLite-backed implementation of the [`blamemux_types::Store`] trait.
pub struct SqliteStore {
    pub(crate) conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open a persistent on-disk database at `path`.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory database (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Run all pragmas and the base history DDL.
    fn init(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves the connection itself usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Create a stage table, reporting whether it was already there.
pub(crate) fn create_stage_table(
    conn: &Connection,
    table: &str,
    ddl: &str,
) -> rusqlite::Result<SchemaStatus> {
    if table_exists(conn, table)? {
        return Ok(SchemaStatus::AlreadyExists);
    }
    conn.execute_batch(ddl)?;
    Ok(SchemaStatus::Created)
}

// ── Tests ─────────────────────────────────────────────────────────────────
