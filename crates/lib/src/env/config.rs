//! Environment configuration.
//!
//! Defaults are overlaid by `KILN_*` environment variables in
//! [`EnvConfig::from_env`], or read from a JSON document in
//! [`EnvConfig::from_file`].

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheConfig;

/// Name of the sqlite cache file created under the output directory when
/// `KILN_CACHE=sqlite` is set without `KILN_CACHE_PATH`.
pub const DEFAULT_CACHE_FILE: &str = ".kiln-cache.sqlite";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid value for {var}: {value:?}")]
  InvalidValue { var: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
  /// Directory the standard output graph writes into.
  pub output_dir: PathBuf,
  /// Track source changes for graphs added afterwards.
  pub watch: bool,
  /// Prefix of the URLs assigned by the standard output graph.
  pub url_prefix: String,
  pub cache: CacheConfig,
  /// Partial-rebuild default for graphs added without an explicit choice.
  pub partial: bool,
  /// Reuse a fingerprint whose size and mtime are unchanged instead of re-hashing.
  pub trust_mtime: bool,
}

impl Default for EnvConfig {
  fn default() -> Self {
    Self {
      output_dir: PathBuf::from("./build"),
      watch: false,
      url_prefix: String::new(),
      cache: CacheConfig::Memory,
      partial: false,
      trust_mtime: true,
    }
  }
}

impl EnvConfig {
  /// Defaults overlaid with `KILN_*` environment variables.
  pub fn from_env() -> Result<Self, ConfigError> {
    let mut config = Self::default();

    if let Some(dir) = var("KILN_OUTPUT_DIR") {
      config.output_dir = PathBuf::from(dir);
    }
    if let Some(value) = var("KILN_WATCH") {
      config.watch = parse_bool("KILN_WATCH", &value)?;
    }
    if let Some(prefix) = var("KILN_URL_PREFIX") {
      config.url_prefix = prefix;
    }
    if let Some(value) = var("KILN_PARTIAL") {
      config.partial = parse_bool("KILN_PARTIAL", &value)?;
    }
    if let Some(value) = var("KILN_TRUST_MTIME") {
      config.trust_mtime = parse_bool("KILN_TRUST_MTIME", &value)?;
    }

    let cache_path = var("KILN_CACHE_PATH").map(PathBuf::from);
    match var("KILN_CACHE").as_deref().map(str::to_ascii_lowercase).as_deref() {
      None | Some("") | Some("memory") => {}
      Some("sqlite") => {
        let path = cache_path.unwrap_or_else(|| config.output_dir.join(DEFAULT_CACHE_FILE));
        config.cache = CacheConfig::Sqlite { path };
      }
      Some(other) => {
        return Err(ConfigError::InvalidValue {
          var: "KILN_CACHE".into(),
          value: other.into(),
        });
      }
    }

    Ok(config)
  }

  /// Read a JSON config document. Missing fields take their defaults.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }
}

fn var(name: &str) -> Option<String> {
  std::env::var(name).ok()
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
  match value.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" | "" => Ok(false),
    _ => Err(ConfigError::InvalidValue {
      var: var.into(),
      value: value.into(),
    }),
  }
}
