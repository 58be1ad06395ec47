//! SQLite-backed key-value store.
//!
//! Thread-safe via an internal `Mutex<Connection>`; all statements are
//! serialized through it.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use super::KeyValueStore;
use super::schema::{apply_schema, read_schema_version};
use crate::error::{PhrasecastError, Result};

/// SQLite key-value store living in a single database file.
pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        apply_schema(&conn)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    /// Database file path, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the schema version.
    pub fn schema_version(&self) -> Result<Option<u32>> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    /// List keys stored under a namespace, sorted.
    pub fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM kv WHERE namespace = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![namespace], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PhrasecastError::Storage(format!("connection lock poisoned: {e}")))
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value,
                                                       updated_at = excluded.updated_at",
            params![namespace, key, value, crate::now_epoch_millis() as i64],
        )?;
        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;
        Ok(())
    }
}
