use std::collections::BTreeMap;
use std::sync::RwLock;

use super::CacheBackend;
use super::types::{CacheEntry, CacheError};

/// Volatile in-process backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
  entries: RwLock<BTreeMap<String, CacheEntry>>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheBackend for MemoryBackend {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
    let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
    Ok(entries.get(key).cloned())
  }

  fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
    let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
    entries.insert(key.to_string(), entry.clone());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), CacheError> {
    let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
    entries.remove(key);
    Ok(())
  }

  fn clear(&self) -> Result<(), CacheError> {
    let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
    entries.clear();
    Ok(())
  }

  fn entries(&self) -> Result<Vec<(String, CacheEntry)>, CacheError> {
    let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
    Ok(entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
  }
}
