//! Cached graph results.
//!
//! [`ResultCache`] maps a [`CacheKey`] (graph name plus run-argument identity)
//! to the last successful result of that graph. Storage is pluggable through
//! [`CacheBackend`]: [`MemoryBackend`] by default, [`SqliteBackend`] for a
//! cache that outlives the process.

mod memory;
mod sqlite;
mod types;

use std::fmt;

use tracing::debug;

use crate::snapshot::CacheSnapshot;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use types::{CacheConfig, CacheEntry, CacheError, CacheKey};

/// Key-value storage for cache entries.
pub trait CacheBackend: fmt::Debug + Send + Sync {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;
  fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError>;
  fn remove(&self, key: &str) -> Result<(), CacheError>;
  fn clear(&self) -> Result<(), CacheError>;
  /// Every entry, ordered by key.
  fn entries(&self) -> Result<Vec<(String, CacheEntry)>, CacheError>;
}

#[derive(Debug)]
pub struct ResultCache {
  backend: Box<dyn CacheBackend>,
}

impl ResultCache {
  pub fn new(backend: impl CacheBackend + 'static) -> Self {
    Self {
      backend: Box::new(backend),
    }
  }

  pub fn memory() -> Self {
    Self::new(MemoryBackend::new())
  }

  pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
    match config {
      CacheConfig::Memory => Ok(Self::memory()),
      CacheConfig::Sqlite { path } => Ok(Self::new(SqliteBackend::open(path)?)),
    }
  }

  pub fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
    let entry = self.backend.get(&key.to_string())?;
    debug!(key = %key, hit = entry.is_some(), "cache lookup");
    Ok(entry)
  }

  pub fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError> {
    self.backend.put(&key.to_string(), entry)
  }

  /// Drop every entry of `graph`, whatever its arguments.
  pub fn remove_graph(&self, graph: &str) -> Result<(), CacheError> {
    for (key, _) in self.backend.entries()? {
      if CacheKey::belongs_to(&key, graph) {
        self.backend.remove(&key)?;
      }
    }
    Ok(())
  }

  pub fn clear(&self) -> Result<(), CacheError> {
    self.backend.clear()
  }

  pub fn entries(&self) -> Result<Vec<(String, CacheEntry)>, CacheError> {
    self.backend.entries()
  }

  /// Capture every entry in a portable snapshot.
  pub fn snapshot(&self) -> Result<CacheSnapshot, CacheError> {
    let mut snapshot = CacheSnapshot::new();
    for (key, entry) in self.backend.entries()? {
      if !entry.fingerprints.is_empty() {
        snapshot.sources.insert(key.clone(), entry.fingerprints);
      }
      snapshot.graphs.insert(key, entry.outputs);
    }
    Ok(snapshot)
  }

  /// Replace the cache content with a snapshot's.
  pub fn restore(&self, snapshot: CacheSnapshot) -> Result<(), CacheError> {
    let CacheSnapshot {
      graphs, mut sources, ..
    } = snapshot;
    self.backend.clear()?;
    for (key, outputs) in graphs {
      let entry = CacheEntry {
        outputs,
        fingerprints: sources.remove(&key).unwrap_or_default(),
      };
      self.backend.put(&key, &entry)?;
    }
    Ok(())
  }
}

impl Default for ResultCache {
  fn default() -> Self {
    Self::memory()
  }
}
