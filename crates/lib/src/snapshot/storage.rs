//! Reading and writing snapshot files.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::consts::SNAPSHOT_VERSION;

use super::types::{CacheSnapshot, SnapshotError};

/// Write a snapshot as JSON.
///
/// Uses atomic write (write to temp, then rename) so a crash never leaves a
/// truncated file behind.
pub fn write_snapshot(path: &Path, snapshot: &CacheSnapshot) -> Result<(), SnapshotError> {
  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    fs::create_dir_all(parent).map_err(SnapshotError::CreateDir)?;
  }

  let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
  let temp_path = path.with_file_name(format!("{file_name}.tmp"));

  let content = serde_json::to_string_pretty(snapshot).map_err(SnapshotError::Serialize)?;
  fs::write(&temp_path, &content).map_err(SnapshotError::Write)?;
  fs::rename(&temp_path, path).map_err(SnapshotError::Write)?;

  info!(path = %path.display(), graphs = snapshot.graphs.len(), "saved cache snapshot");
  Ok(())
}

/// Read a snapshot, rejecting unknown container versions.
pub fn read_snapshot(path: &Path) -> Result<CacheSnapshot, SnapshotError> {
  let content = fs::read_to_string(path).map_err(SnapshotError::Read)?;
  let snapshot: CacheSnapshot = serde_json::from_str(&content).map_err(SnapshotError::Parse)?;

  if snapshot.version != SNAPSHOT_VERSION {
    return Err(SnapshotError::UnsupportedVersion(snapshot.version));
  }

  info!(path = %path.display(), graphs = snapshot.graphs.len(), "loaded cache snapshot");
  Ok(snapshot)
}
