use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::{FingerprintSet, PortMap};
use crate::util::hash::ObjectHash;

/// Identity of a cached result: graph name plus the hash of its run arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
  pub graph: String,
  pub args: Option<ObjectHash>,
}

impl CacheKey {
  pub fn graph(name: impl Into<String>) -> Self {
    Self {
      graph: name.into(),
      args: None,
    }
  }

  pub fn with_args(name: impl Into<String>, args: ObjectHash) -> Self {
    Self {
      graph: name.into(),
      args: Some(args),
    }
  }

  /// True if `key` (in its string form) belongs to `graph`.
  pub(crate) fn belongs_to(key: &str, graph: &str) -> bool {
    key == graph || key.strip_prefix(graph).is_some_and(|rest| rest.starts_with('@'))
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.args {
      Some(hash) => write!(f, "{}@{}", self.graph, hash),
      None => write!(f, "{}", self.graph),
    }
  }
}

/// A cached graph result and the source fingerprints it was built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub outputs: PortMap,
  #[serde(default, skip_serializing_if = "FingerprintSet::is_empty")]
  pub fingerprints: FingerprintSet,
}

impl CacheEntry {
  pub fn new(outputs: PortMap) -> Self {
    Self {
      outputs,
      fingerprints: FingerprintSet::new(),
    }
  }
}

/// Which backend stores cached results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CacheConfig {
  /// Volatile, in-process.
  #[default]
  Memory,
  /// Durable embedded database file.
  Sqlite { path: PathBuf },
}

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to encode cache entry: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("cache lock poisoned")]
  Poisoned,
}
