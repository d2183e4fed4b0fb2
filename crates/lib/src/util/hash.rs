//! SHA-256 digests behind artifact fingerprints and cache keys.
//!
//! - [`ContentHash`] identifies artifact content (full hex digest).
//! - [`ObjectHash`] identifies a serializable value, truncated for use in keys.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::OBJ_HASH_PREFIX_LEN;

pub type HashError = serde_json::Error;

/// Truncated digest of a value's JSON form, e.g. a set of run arguments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Values whose identity is the hash of their serialized form.
pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let json = serde_json::to_vec(self)?;
    let mut digest = hash_bytes(&json).0;
    digest.truncate(OBJ_HASH_PREFIX_LEN);
    Ok(ObjectHash(digest))
  }
}

/// Lowercase hex SHA-256 of some content, 64 characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
  fn of(hasher: Sha256) -> Self {
    ContentHash(hex::encode(hasher.finalize()))
  }

  /// The first `len` characters, for cache-busting query strings.
  pub fn short(&self, len: usize) -> &str {
    &self.0[..len.min(self.0.len())]
  }
}

impl fmt::Display for ContentHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Stream a file through the hasher. Returns the digest and the byte count.
pub fn hash_file(path: &Path) -> io::Result<(ContentHash, u64)> {
  let mut file = File::open(path)?;
  let mut hasher = Sha256::new();
  let size = io::copy(&mut file, &mut hasher)?;
  Ok((ContentHash::of(hasher), size))
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash::of(Sha256::new_with_prefix(data))
}
