//! Local state store: synchronous string key/value access.
//!
//! Values are JSON text. A missing key is `Ok(None)`; a value that fails to
//! decode is `ReadError::Malformed` so callers can choose to fall back to the
//! default instead of failing.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("state store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed value under '{key}': {reason}")]
    Malformed { key: String, reason: String },
}

pub trait StateStore: Send + Sync {
    fn read(&self, key: &str) -> std::result::Result<Option<String>, ReadError>;
    fn write(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Read and decode a JSON value.
pub fn read_json<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> std::result::Result<Option<T>, ReadError> {
    let Some(raw) = store.read(key)? else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| ReadError::Malformed {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

/// Read a JSON value, treating absent or malformed data as the default.
///
/// `Unavailable` still propagates: that is a real execution failure, not
/// missing data.
pub fn read_json_or_default<T: DeserializeOwned + Default>(
    store: &dyn StateStore,
    key: &str,
) -> std::result::Result<T, ReadError> {
    match read_json(store, key) {
        Ok(value) => Ok(value.unwrap_or_default()),
        Err(ReadError::Malformed { key, reason }) => {
            tracing::warn!("Ignoring malformed value under '{}': {}", key, reason);
            Ok(T::default())
        }
        Err(e) => Err(e),
    }
}

pub fn write_json<T: Serialize + ?Sized>(store: &dyn StateStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.write(key, &raw)
}

/// Process-local store used by tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn read(&self, key: &str) -> std::result::Result<Option<String>, ReadError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| ReadError::Unavailable(format!("store lock poisoned: {}", e)))?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("store lock poisoned: {}", e))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("store lock poisoned: {}", e))?;
        entries.remove(key);
        Ok(())
    }
}

/// SQLite-backed store; one `local_state` table of key/value rows.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS local_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )"#,
            [],
        )?;
        Ok(())
    }
}

impl StateStore for SqliteStateStore {
    fn read(&self, key: &str) -> std::result::Result<Option<String>, ReadError> {
        let conn = self
            .lock_conn()
            .map_err(|e| ReadError::Unavailable(e.to_string()))?;
        let result = conn.query_row(
            "SELECT value FROM local_state WHERE key = ?1",
            [key],
            |row| row.get(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ReadError::Unavailable(e.to_string())),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO local_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM local_state WHERE key = ?1", [key])?;
        Ok(())
    }
}
