//! Test utilities for kiln-lib.
//!
//! Small nodes with observable behaviour and filesystem helpers shared by the
//! unit tests of several modules.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::artifact::{Artifact, PortMap, default_port};
use crate::consts::DEFAULT_PORT;
use crate::node::{Inputs, Node, NodeError, NodeKind, PortSpec, take_port};

/// Write `(relative path, content)` pairs under `root`, creating directories.
pub fn write_files(root: &Path, files: &[(&str, &str)]) {
  for (path, content) in files {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(full, content).unwrap();
  }
}

/// Logical paths of a sequence of artifacts.
pub fn names(artifacts: &[Artifact]) -> Vec<&str> {
  artifacts.iter().map(|a| a.path()).collect()
}

/// Source node emitting a fixed list of artifacts.
#[derive(Debug, Clone)]
pub struct StaticSource {
  artifacts: Vec<Artifact>,
}

impl StaticSource {
  pub fn new(files: &[(&str, &str)]) -> Self {
    Self {
      artifacts: files.iter().map(|(p, c)| Artifact::from_bytes(*p, *c)).collect(),
    }
  }
}

impl Node for StaticSource {
  fn label(&self) -> String {
    "static".to_string()
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Source
  }

  fn inputs(&self) -> Inputs {
    Inputs::none()
  }

  fn process(&self, _inputs: PortMap) -> Result<PortMap, NodeError> {
    Ok(default_port(self.artifacts.clone()))
  }
}

/// Pass-through that counts its invocations and records what it saw.
///
/// Clones share the counters, so a test can keep a handle after moving the
/// node into a graph.
#[derive(Debug, Clone)]
pub struct CountingNode {
  name: String,
  calls: Arc<AtomicUsize>,
  seen: Arc<AtomicUsize>,
}

impl CountingNode {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      calls: Arc::new(AtomicUsize::new(0)),
      seen: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  /// Total number of artifacts processed across all calls.
  pub fn seen(&self) -> usize {
    self.seen.load(Ordering::SeqCst)
  }
}

impl Node for CountingNode {
  fn label(&self) -> String {
    self.name.clone()
  }

  fn process(&self, mut inputs: PortMap) -> Result<PortMap, NodeError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let items = take_port(&mut inputs, DEFAULT_PORT);
    self.seen.fetch_add(items.len(), Ordering::SeqCst);
    Ok(default_port(items))
  }
}

/// Node that always fails.
#[derive(Debug, Clone)]
pub struct FailingNode;

impl Node for FailingNode {
  fn label(&self) -> String {
    "failing".to_string()
  }

  fn process(&self, _inputs: PortMap) -> Result<PortMap, NodeError> {
    Err(NodeError::failed("boom"))
  }
}

/// Joins a `left` and a `right` input onto its default output, left first.
#[derive(Debug, Clone)]
pub struct PairNode;

impl Node for PairNode {
  fn label(&self) -> String {
    "pair".to_string()
  }

  fn inputs(&self) -> Inputs {
    Inputs::Ports(vec![PortSpec::single("left"), PortSpec::single("right")])
  }

  fn process(&self, mut inputs: PortMap) -> Result<PortMap, NodeError> {
    let mut items = take_port(&mut inputs, "left");
    items.extend(take_port(&mut inputs, "right"));
    Ok(default_port(items))
  }
}
