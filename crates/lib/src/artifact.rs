//! Immutable file-like artifacts flowing between graph nodes.
//!
//! An [`Artifact`] carries a logical path, a content handle, a content
//! [`Fingerprint`] and an origin tag naming the source artifact it was derived
//! from. Transformations never mutate an artifact: the `with_*` helpers return
//! new values that keep the origin, which is what the partial-rebuild merge
//! keys on.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_PORT;
use crate::util::hash::{ContentHash, Hashable, hash_bytes, hash_file};

/// Output of a node or graph: port name -> ordered artifact sequence.
pub type PortMap = BTreeMap<String, Vec<Artifact>>;

/// Fingerprints of a set of artifacts, keyed by origin.
pub type FingerprintSet = BTreeMap<String, Fingerprint>;

/// Build a [`PortMap`] holding a single sequence on the default port.
pub fn default_port(artifacts: Vec<Artifact>) -> PortMap {
  let mut map = PortMap::new();
  map.insert(DEFAULT_PORT.to_string(), artifacts);
  map
}

/// Run arguments hash by artifact metadata, giving each argument set its own cache key.
impl Hashable for PortMap {}

/// Content-derived identity of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
  /// SHA-256 of the content.
  pub hash: ContentHash,
  /// Content length in bytes.
  pub size: u64,
  /// Modification time in nanoseconds since the epoch, when known.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mtime: Option<u64>,
}

impl Fingerprint {
  pub fn of_bytes(data: &[u8]) -> Self {
    Self {
      hash: hash_bytes(data),
      size: data.len() as u64,
      mtime: None,
    }
  }

  /// Hash a file on disk, recording its size and modification time.
  pub fn of_file(path: &Path) -> io::Result<Self> {
    let mtime = file_mtime(path)?;
    let (hash, size) = hash_file(path)?;
    Ok(Self { hash, size, mtime })
  }

  /// True when both fingerprints describe the same content.
  ///
  /// Timestamps are ignored: touching a file without changing it is not a change.
  pub fn same_content(&self, other: &Fingerprint) -> bool {
    self.hash == other.hash && self.size == other.size
  }
}

/// Read a file's size and modification time without hashing it.
pub fn file_stat(path: &Path) -> io::Result<(u64, Option<u64>)> {
  let meta = fs::metadata(path)?;
  Ok((meta.len(), mtime_of(&meta)))
}

fn file_mtime(path: &Path) -> io::Result<Option<u64>> {
  Ok(mtime_of(&fs::metadata(path)?))
}

fn mtime_of(meta: &fs::Metadata) -> Option<u64> {
  meta
    .modified()
    .ok()
    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
    .map(|d| d.as_nanos() as u64)
}

/// Handle to an artifact's content.
#[derive(Debug, Clone)]
pub enum ArtifactData {
  /// Content lives in a file on disk.
  File(PathBuf),
  /// Content held in memory.
  Blob(Arc<[u8]>),
  /// Metadata only; the content is not available.
  Detached,
}

impl ArtifactData {
  pub fn read(&self) -> io::Result<Vec<u8>> {
    match self {
      ArtifactData::File(path) => fs::read(path),
      ArtifactData::Blob(bytes) => Ok(bytes.to_vec()),
      ArtifactData::Detached => Err(io::Error::new(
        io::ErrorKind::NotFound,
        "artifact content is detached",
      )),
    }
  }
}

/// An immutable file-like unit of data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "ArtifactRecord", from = "ArtifactRecord")]
pub struct Artifact {
  path: String,
  root: PathBuf,
  data: ArtifactData,
  fingerprint: Fingerprint,
  origin: String,
  url: Option<String>,
}

impl Artifact {
  /// Read an artifact from `root/path` on disk.
  ///
  /// The artifact's origin is its full path.
  pub fn from_file(root: impl Into<PathBuf>, path: impl Into<String>) -> io::Result<Self> {
    let root = root.into();
    let path = path.into();
    let full = root.join(&path);
    let fingerprint = Fingerprint::of_file(&full)?;
    Ok(Self {
      origin: full.to_string_lossy().to_string(),
      path,
      root,
      data: ArtifactData::File(full),
      fingerprint,
      url: None,
    })
  }

  /// Build an in-memory artifact. Its origin is its logical path.
  pub fn from_bytes(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
    let path = path.into();
    let data: Vec<u8> = data.into();
    Self {
      origin: path.clone(),
      path,
      root: PathBuf::from("."),
      fingerprint: Fingerprint::of_bytes(&data),
      data: ArtifactData::Blob(Arc::from(data)),
      url: None,
    }
  }

  pub fn path(&self) -> &str {
    &self.path
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Location of the artifact on disk (`root/path`).
  pub fn full_path(&self) -> PathBuf {
    self.root.join(&self.path)
  }

  pub fn data(&self) -> &ArtifactData {
    &self.data
  }

  pub fn fingerprint(&self) -> &Fingerprint {
    &self.fingerprint
  }

  pub fn origin(&self) -> &str {
    &self.origin
  }

  pub fn url(&self) -> Option<&str> {
    self.url.as_deref()
  }

  pub fn read(&self) -> io::Result<Vec<u8>> {
    self.data.read()
  }

  pub fn read_to_string(&self) -> io::Result<String> {
    String::from_utf8(self.read()?).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
  }

  pub fn with_path(&self, path: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      ..self.clone()
    }
  }

  /// Replace the extension of the logical path (`ext` includes the dot, e.g. `".js"`).
  pub fn with_extension(&self, ext: &str) -> Self {
    let stem = match self.path.rfind('.') {
      Some(idx) if !self.path[idx..].contains('/') => &self.path[..idx],
      _ => self.path.as_str(),
    };
    self.with_path(format!("{stem}{ext}"))
  }

  pub fn with_root(&self, root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      ..self.clone()
    }
  }

  /// Replace the content, recomputing the fingerprint.
  pub fn with_data(&self, data: impl Into<Vec<u8>>) -> Self {
    let data: Vec<u8> = data.into();
    Self {
      fingerprint: Fingerprint::of_bytes(&data),
      data: ArtifactData::Blob(Arc::from(data)),
      ..self.clone()
    }
  }

  pub fn with_url(&self, url: impl Into<String>) -> Self {
    Self {
      url: Some(url.into()),
      ..self.clone()
    }
  }

  pub fn with_origin(&self, origin: impl Into<String>) -> Self {
    Self {
      origin: origin.into(),
      ..self.clone()
    }
  }
}

impl PartialEq for Artifact {
  fn eq(&self, other: &Self) -> bool {
    self.path == other.path
      && self.root == other.root
      && self.fingerprint == other.fingerprint
      && self.origin == other.origin
      && self.url == other.url
  }
}

impl Eq for Artifact {}

/// Serialized form of an [`Artifact`]: metadata only, no content bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
  pub path: String,
  pub root: PathBuf,
  pub fingerprint: Fingerprint,
  pub origin: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
}

impl From<Artifact> for ArtifactRecord {
  fn from(artifact: Artifact) -> Self {
    Self {
      path: artifact.path,
      root: artifact.root,
      fingerprint: artifact.fingerprint,
      origin: artifact.origin,
      url: artifact.url,
    }
  }
}

impl From<ArtifactRecord> for Artifact {
  fn from(record: ArtifactRecord) -> Self {
    let full = record.root.join(&record.path);
    Self {
      path: record.path,
      data: ArtifactData::File(full),
      root: record.root,
      fingerprint: record.fingerprint,
      origin: record.origin,
      url: record.url,
    }
  }
}
