use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::Connection;

use crate::{BlobStore, KvStore, Result};

/// SQLite-backed warm kv.
///
/// Wraps a single connection in a `Mutex`. Critical sections are short
/// single-statement operations, so a std mutex is fine even under the async
/// callers.
pub struct SqliteKv {
    db: Mutex<Connection>,
}

impl SqliteKv {
    /// Wrap an already-open connection, creating the table if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT value FROM kv WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get::<_, String>(0),
        ) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            rusqlite::params![key, value, now],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key])?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let current: Option<String> = match tx.query_row(
            "SELECT value FROM kv WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get(0),
        ) {
            Ok(v) => Some(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        if current.as_deref() != expected {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            rusqlite::params![key, new, now],
        )?;
        tx.commit()?;
        Ok(true)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = db.prepare(
            "SELECT key FROM kv WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key",
        )?;
        let rows = stmt.query_map(rusqlite::params![pattern], |row| row.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

/// SQLite-backed cold blob store.
pub struct SqliteBlobs {
    db: Mutex<Connection>,
}

impl SqliteBlobs {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blobs (
                path       TEXT PRIMARY KEY,
                data       BLOB NOT NULL,
                created_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl BlobStore for SqliteBlobs {
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT data FROM blobs WHERE path = ?1",
            rusqlite::params![path],
            |row| row.get::<_, Vec<u8>>(0),
        ) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, path: &str, data: &[u8]) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO blobs (path, data, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET data = ?2",
            rusqlite::params![path, data, now],
        )?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM blobs WHERE path = ?1", rusqlite::params![path])?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = db.prepare(
            "SELECT path FROM blobs WHERE path LIKE ?1 ESCAPE '\\' ORDER BY path",
        )?;
        let rows = stmt.query_map(rusqlite::params![pattern], |row| row.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}
