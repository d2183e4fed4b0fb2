use std::fmt;

use thiserror::Error;

use crate::cache::CacheError;
use crate::graph::GraphError;
use crate::snapshot::SnapshotError;

#[derive(Debug, Error)]
pub enum EnvError {
  #[error("unknown graph: {0}")]
  UnknownGraph(String),

  #[error("graph already registered: {0}")]
  DuplicateGraph(String),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error(transparent)]
  Snapshot(#[from] SnapshotError),

  #[error("failed to hash run arguments: {0}")]
  Args(#[from] serde_json::Error),

  #[error("{} graph(s) failed: {}", .failures.len(), FailedNames(.failures))]
  MultiRun { failures: Vec<(String, EnvError)> },

  #[error("worker failed: {0}")]
  Worker(String),
}

impl EnvError {
  /// The per-graph failures of a multi-graph run, or this error alone.
  pub fn failures(&self) -> Vec<(&str, &EnvError)> {
    match self {
      EnvError::MultiRun { failures } => failures.iter().map(|(name, e)| (name.as_str(), e)).collect(),
      other => vec![("", other)],
    }
  }

  /// True if the failure is a graph definition problem rather than a run failure.
  pub fn is_definition_error(&self) -> bool {
    matches!(self, EnvError::Graph(e) if e.class() != crate::graph::ErrorClass::Execution)
  }
}

struct FailedNames<'a>(&'a [(String, EnvError)]);

impl fmt::Display for FailedNames<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, (name, _)) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{name}")?;
    }
    Ok(())
  }
}

/// Outcome of one watched graph in one poll of the watch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
  Rebuilt { graph: String },
  Unchanged { graph: String },
  Failed { graph: String, error: String },
}

impl WatchEvent {
  pub fn graph(&self) -> &str {
    match self {
      WatchEvent::Rebuilt { graph } | WatchEvent::Unchanged { graph } | WatchEvent::Failed { graph, .. } => graph,
    }
  }
}

/// How a single `run` was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunOutcome {
  Cached,
  Built,
  Unchanged,
}

/// Per-graph registration options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
  /// Partial rebuilds for this graph; `None` takes the configured default.
  pub partial: Option<bool>,
  /// Register the graph without the environment's default output.
  pub ignore_default_output: bool,
}

impl AddOptions {
  pub fn partial(mut self, partial: bool) -> Self {
    self.partial = Some(partial);
    self
  }

  pub fn ignore_default_output(mut self) -> Self {
    self.ignore_default_output = true;
    self
  }
}
