//! Durable cache backend on an embedded SQLite database.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::CacheBackend;
use super::types::{CacheEntry, CacheError};

/// Stores each entry as a JSON row keyed by its cache key.
#[derive(Debug)]
pub struct SqliteBackend {
  conn: Mutex<Connection>,
}

impl SqliteBackend {
  /// Open (or create) the database at `path`.
  pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
    let path = path.as_ref();
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    let backend = Self {
      conn: Mutex::new(conn),
    };
    backend.init_schema()?;
    debug!(path = %path.display(), "opened sqlite cache");
    Ok(backend)
  }

  /// In-memory database, for tests.
  pub fn in_memory() -> Result<Self, CacheError> {
    let backend = Self {
      conn: Mutex::new(Connection::open_in_memory()?),
    };
    backend.init_schema()?;
    Ok(backend)
  }

  fn init_schema(&self) -> Result<(), CacheError> {
    self.lock()?.execute(
      "CREATE TABLE IF NOT EXISTS cache_entries (
        key TEXT PRIMARY KEY,
        entry TEXT NOT NULL
      )",
      [],
    )?;
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
    self.conn.lock().map_err(|_| CacheError::Poisoned)
  }
}

impl CacheBackend for SqliteBackend {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
    let conn = self.lock()?;
    let raw: Option<String> = conn
      .query_row("SELECT entry FROM cache_entries WHERE key = ?1", params![key], |row| row.get(0))
      .optional()?;
    match raw {
      Some(json) => Ok(Some(serde_json::from_str(&json)?)),
      None => Ok(None),
    }
  }

  fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
    let json = serde_json::to_string(entry)?;
    let conn = self.lock()?;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
      "INSERT OR REPLACE INTO cache_entries (key, entry) VALUES (?1, ?2)",
      params![key, json],
    )?;
    tx.commit()?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), CacheError> {
    self
      .lock()?
      .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
    Ok(())
  }

  fn clear(&self) -> Result<(), CacheError> {
    self.lock()?.execute("DELETE FROM cache_entries", [])?;
    Ok(())
  }

  fn entries(&self) -> Result<Vec<(String, CacheEntry)>, CacheError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT key, entry FROM cache_entries ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

    let mut entries = Vec::new();
    for row in rows {
      let (key, json) = row?;
      entries.push((key, serde_json::from_str(&json)?));
    }
    Ok(entries)
  }
}
