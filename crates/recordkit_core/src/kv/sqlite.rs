//! SQLite-backed key-value backend.
//!
//! # Invariants
//! - `commit` runs inside one transaction: either every op lands or none.
//! - The connection is migrated before the first read.

use super::{KeyValueStore, KvOp, KvResult};
use crate::db::{open_db, open_db_in_memory};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const UPSERT_SQL: &str = "INSERT INTO kv_entries (key, value, updated_at)
     VALUES (?1, ?2, CAST(strftime('%s', 'now') AS INTEGER) * 1000)
     ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        updated_at = excluded.updated_at;";
const DELETE_SQL: &str = "DELETE FROM kv_entries WHERE key = ?1;";

/// Blob store persisted in one SQLite table.
pub struct SqliteKvStore {
    conn: Connection,
}

impl SqliteKvStore {
    pub fn open(path: impl AsRef<Path>) -> KvResult<Self> {
        Ok(Self {
            conn: open_db(path)?,
        })
    }

    pub fn open_in_memory() -> KvResult<Self> {
        Ok(Self {
            conn: open_db_in_memory()?,
        })
    }

    /// Wraps a connection already opened through [`open_db`].
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl KeyValueStore for SqliteKvStore {
    fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1;",
                [key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> KvResult<()> {
        self.conn.execute(UPSERT_SQL, params![key, value])?;
        Ok(())
    }

    fn remove(&self, key: &str) -> KvResult<()> {
        self.conn.execute(DELETE_SQL, [key])?;
        Ok(())
    }

    fn commit(&self, batch: &[KvOp]) -> KvResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for op in batch {
            match op {
                KvOp::Set { key, value } => {
                    tx.execute(UPSERT_SQL, params![key, value])?;
                }
                KvOp::Remove { key } => {
                    tx.execute(DELETE_SQL, [key])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}
