//! Identifiers, edges and errors for graph construction and execution.

use std::fmt;

use thiserror::Error;

use crate::node::NodeError;

/// Index of a node within its graph. Stable for the graph's lifetime,
/// including across clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// A directed connection from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
  pub from: NodeId,
  pub from_port: String,
  pub to: NodeId,
  pub to_port: String,
}

impl fmt::Display for Edge {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{} -> {}:{}", self.from, self.from_port, self.to, self.to_port)
  }
}

/// Broad category of a [`GraphError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
  /// Raised while authoring a graph; fix the definition.
  Construction,
  /// Raised by finalize or run preconditions; fatal until the definition changes.
  Validation,
  /// A run failed; the previous cached result stays authoritative.
  Execution,
}

/// Errors raised while building, validating or running a graph.
#[derive(Debug, Error)]
pub enum GraphError {
  #[error("graph '{graph}' is finalized and can no longer be modified")]
  Frozen { graph: String },

  #[error("graph '{graph}' has no node {node}")]
  UnknownNode { graph: String, node: NodeId },

  #[error("node '{node}' has no port '{port}'")]
  PortMismatch { node: String, port: String },

  #[error("input port '{port}' of node '{node}' accepts a single edge and is already connected")]
  PortAlreadyConnected { node: String, port: String },

  #[error("wildcard edge into '{node}' requires '*' on both ends and a node accepting any port")]
  InvalidWildcard { node: String },

  #[error("placeholder '{0}' has no substitute")]
  UnboundPlaceholder(String),

  #[error("substitute '{0}' does not match any placeholder")]
  UnexpectedSubstitute(String),

  #[error("macro instantiation exceeded depth limit of {limit}")]
  RecursionLimit { limit: usize },

  #[error("graph '{graph}' contains a cycle through: {}", nodes.join(", "))]
  Cycle { graph: String, nodes: Vec<String> },

  #[error("graph '{graph}' has more than one source: {}", nodes.join(", "))]
  AmbiguousSource { graph: String, nodes: Vec<String> },

  #[error("graph '{graph}' has more than one terminal node: {}", nodes.join(", "))]
  AmbiguousSink { graph: String, nodes: Vec<String> },

  #[error("required input port '{port}' of node '{node}' in graph '{graph}' is not connected")]
  MissingInput { graph: String, node: String, port: String },

  #[error("graph '{graph}' has no terminal node")]
  NoSink { graph: String },

  #[error("graph '{0}' must be finalized before it can run")]
  NotFinalized(String),

  #[error("graph '{graph}' has no source port '{port}' for a run argument")]
  UnexpectedArgument { graph: String, port: String },

  #[error("node '{node}' in graph '{graph}' failed: {source}")]
  NodeFailed {
    graph: String,
    node: String,
    #[source]
    source: NodeError,
  },

  #[error("run of graph '{graph}' halted: no changes")]
  Halted { graph: String },
}

impl GraphError {
  pub fn class(&self) -> ErrorClass {
    match self {
      GraphError::Frozen { .. }
      | GraphError::UnknownNode { .. }
      | GraphError::PortMismatch { .. }
      | GraphError::PortAlreadyConnected { .. }
      | GraphError::InvalidWildcard { .. }
      | GraphError::UnboundPlaceholder(_)
      | GraphError::UnexpectedSubstitute(_)
      | GraphError::RecursionLimit { .. } => ErrorClass::Construction,
      GraphError::Cycle { .. }
      | GraphError::AmbiguousSource { .. }
      | GraphError::AmbiguousSink { .. }
      | GraphError::MissingInput { .. }
      | GraphError::NoSink { .. }
      | GraphError::NotFinalized(_)
      | GraphError::UnexpectedArgument { .. } => ErrorClass::Validation,
      GraphError::NodeFailed { .. } | GraphError::Halted { .. } => ErrorClass::Execution,
    }
  }

  /// True for the early-abort signal raised when nothing changed.
  pub fn is_halt(&self) -> bool {
    matches!(self, GraphError::Halted { .. })
  }
}
