use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::KeyValueStore;
use crate::error::TryOnError;

/// SQLite-backed key-value store.
/// All operations are synchronous (rusqlite is blocking) and values are small.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the store database at `db_path`.
    /// Creates the parent directory and the `kv` table if missing.
    pub fn open(db_path: &Path) -> Result<Self, TryOnError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TryOnError::Storage(format!("Failed to create data dir: {}", e)))?;
        }

        let conn = Connection::open(db_path).map_err(|e| {
            TryOnError::Storage(format!("Failed to open store at {:?}: {}", db_path, e))
        })?;
        Self::init(conn, &format!("{:?}", db_path))
    }

    /// A store that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self, TryOnError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, "memory")
    }

    fn init(conn: Connection, label: &str) -> Result<Self, TryOnError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )
        .map_err(|e| TryOnError::Storage(format!("Failed to create table: {}", e)))?;

        info!("Opened key-value store at {}", label);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for SqliteStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, TryOnError> {
        let value = self
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()
            .map_err(|e| TryOnError::Storage(format!("Failed to read '{}': {}", key, e)))?;
        debug!("Loaded '{}': {}", key, if value.is_some() { "hit" } else { "absent" });
        Ok(value)
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<(), TryOnError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO kv (key, value, updated_at)
                 VALUES (?1, ?2, datetime('now'))",
                params![key, value],
            )
            .map_err(|e| TryOnError::Storage(format!("Failed to write '{}': {}", key, e)))?;
        debug!("Saved '{}' ({} bytes)", key, value.len());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), TryOnError> {
        self.conn()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|e| TryOnError::Storage(format!("Failed to delete '{}': {}", key, e)))?;
        Ok(())
    }
}
