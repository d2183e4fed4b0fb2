use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::{FingerprintSet, PortMap};
use crate::consts::SNAPSHOT_VERSION;

/// Versioned container: cache key -> output ports, plus source fingerprints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
  pub version: u32,
  /// Seconds since the Unix epoch.
  pub created_at: u64,
  pub graphs: BTreeMap<String, PortMap>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub sources: BTreeMap<String, FingerprintSet>,
}

impl CacheSnapshot {
  pub fn new() -> Self {
    let created_at = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs())
      .unwrap_or_default();
    Self {
      version: SNAPSHOT_VERSION,
      created_at,
      graphs: BTreeMap::new(),
      sources: BTreeMap::new(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.graphs.is_empty()
  }
}

impl Default for CacheSnapshot {
  fn default() -> Self {
    Self::new()
  }
}

/// Errors reading or writing snapshot files.
#[derive(Debug, Error)]
pub enum SnapshotError {
  #[error("failed to read snapshot: {0}")]
  Read(#[source] std::io::Error),

  #[error("failed to write snapshot: {0}")]
  Write(#[source] std::io::Error),

  #[error("failed to parse snapshot: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize snapshot: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("failed to create snapshot directory: {0}")]
  CreateDir(#[source] std::io::Error),

  #[error("unsupported snapshot version {0} (expected {SNAPSHOT_VERSION})")]
  UnsupportedVersion(u32),
}
