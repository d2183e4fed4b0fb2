//! Shared helpers for kiln-lib integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use kiln_lib::artifact::Artifact;
use kiln_lib::node::{GlobNode, MapNode};
use kiln_lib::{EnvConfig, Graph, NodeError};
use tempfile::TempDir;

/// Isolated scratch directory with a `src/` tree and an `out/` directory.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  /// Write a file relative to `src/`.
  pub fn write_src(&self, relative_path: &str, content: &str) {
    let path = self.src_path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn remove_src(&self, relative_path: &str) {
    std::fs::remove_file(self.src_path().join(relative_path)).unwrap();
  }

  pub fn src_path(&self) -> PathBuf {
    self.temp.path().join("src")
  }

  pub fn output_path(&self) -> PathBuf {
    self.temp.path().join("out")
  }

  pub fn path(&self, name: &str) -> PathBuf {
    self.temp.path().join(name)
  }

  /// Watching config writing into `out/`. Always re-hashes so same-size
  /// edits within one mtime tick are still seen.
  pub fn watch_config(&self, partial: bool) -> EnvConfig {
    EnvConfig {
      output_dir: self.output_path(),
      watch: true,
      partial,
      trust_mtime: false,
      ..EnvConfig::default()
    }
  }
}

/// Upper-cases every artifact, counting how many it processed.
#[derive(Clone, Default)]
pub struct Upper {
  processed: Arc<AtomicUsize>,
}

impl Upper {
  pub fn node(&self) -> MapNode {
    let processed = Arc::clone(&self.processed);
    MapNode::new("upper", move |artifact: &Artifact| {
      processed.fetch_add(1, Ordering::SeqCst);
      let data = artifact.read().map_err(NodeError::from)?;
      Ok(artifact.with_data(data.to_ascii_uppercase()))
    })
  }

  pub fn processed(&self) -> usize {
    self.processed.load(Ordering::SeqCst)
  }
}

/// `glob(src, *.js) -> upper` named `name`.
pub fn upper_graph(name: &str, src: &Path, upper: &Upper) -> Graph {
  let mut graph = Graph::new(name);
  let glob = graph.add(GlobNode::new(src, &["*.js"])).unwrap();
  let map = graph.add(upper.node()).unwrap();
  graph.pipe(glob, map).unwrap();
  graph
}

/// Logical paths of a sequence of artifacts.
pub fn names(artifacts: &[Artifact]) -> Vec<&str> {
  artifacts.iter().map(|a| a.path()).collect()
}

/// Contents of a sequence of artifacts.
pub fn contents(artifacts: &[Artifact]) -> Vec<String> {
  artifacts.iter().map(|a| a.read_to_string().unwrap()).collect()
}
