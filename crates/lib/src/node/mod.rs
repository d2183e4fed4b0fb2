//! Computation units with named input and output ports.
//!
//! A [`Node`] declares its ports and its [`NodeKind`]; the graph uses both to
//! validate wiring at finalize time and to route artifacts at run time. Nodes
//! process whole port maps: every input port maps to the ordered sequence of
//! artifacts gathered from its edges, and every output port produces a new
//! sequence.

pub mod builtin;

use std::fmt;
use std::io;

use thiserror::Error;

use crate::artifact::{Artifact, PortMap};
use crate::consts::DEFAULT_PORT;
use crate::graph::GraphError;

pub use builtin::{
  ConcatNode, FilterNode, GlobNode, MapNode, MergeNode, NoopNode, PlaceholderNode, SplitExtNode, UrlNode, WriteNode,
};

/// The role a node plays in a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
  /// Receives the graph's run arguments instead of upstream edges.
  Source,
  /// Ordinary transformation.
  Transform,
  /// Terminal pass-through collecting the graph's result.
  Sink,
  /// Stand-in for a node supplied when a macro is instantiated.
  Placeholder,
  /// Pass-through that does nothing.
  Noop,
}

impl fmt::Display for NodeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      NodeKind::Source => "source",
      NodeKind::Transform => "transform",
      NodeKind::Sink => "sink",
      NodeKind::Placeholder => "placeholder",
      NodeKind::Noop => "noop",
    };
    write!(f, "{s}")
  }
}

/// Declaration of a single input port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
  pub name: String,
  /// Accepts any number of edges, concatenated in edge order.
  pub multi: bool,
  /// Must be wired for the graph to finalize.
  pub required: bool,
}

impl PortSpec {
  /// A required port accepting exactly one edge.
  pub fn single(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      multi: false,
      required: true,
    }
  }

  /// A port accepting any number of edges, including none.
  pub fn multi(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      multi: true,
      required: false,
    }
  }

  pub fn optional(mut self) -> Self {
    self.required = false;
    self
  }
}

/// Input ports a node accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inputs {
  Ports(Vec<PortSpec>),
  /// Any port name, each accepting any number of edges.
  Any,
}

impl Inputs {
  pub fn none() -> Self {
    Inputs::Ports(Vec::new())
  }

  /// The single required default port.
  pub fn single() -> Self {
    Inputs::Ports(vec![PortSpec::single(DEFAULT_PORT)])
  }

  pub fn port(&self, name: &str) -> Option<PortSpec> {
    match self {
      Inputs::Ports(ports) => ports.iter().find(|p| p.name == name).cloned(),
      Inputs::Any => Some(PortSpec::multi(name)),
    }
  }

  /// The port an unnamed edge falls back to: the default port, or the only port.
  pub fn fallback(&self) -> Option<PortSpec> {
    match self {
      Inputs::Ports(ports) if ports.len() == 1 => ports.first().cloned(),
      _ => self.port(DEFAULT_PORT),
    }
  }

  pub fn is_any(&self) -> bool {
    matches!(self, Inputs::Any)
  }

  pub fn is_empty(&self) -> bool {
    matches!(self, Inputs::Ports(ports) if ports.is_empty())
  }
}

/// Output ports a node produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outputs {
  Ports(Vec<String>),
  /// Port names are only known at run time.
  Any,
}

impl Outputs {
  pub fn none() -> Self {
    Outputs::Ports(Vec::new())
  }

  pub fn single() -> Self {
    Outputs::Ports(vec![DEFAULT_PORT.to_string()])
  }

  pub fn provides(&self, name: &str) -> bool {
    match self {
      Outputs::Ports(ports) => ports.iter().any(|p| p == name),
      Outputs::Any => true,
    }
  }

  pub fn fallback(&self) -> Option<String> {
    match self {
      Outputs::Ports(ports) if ports.len() == 1 => ports.first().cloned(),
      Outputs::Ports(_) => self.provides(DEFAULT_PORT).then(|| DEFAULT_PORT.to_string()),
      Outputs::Any => Some(DEFAULT_PORT.to_string()),
    }
  }

  pub fn is_any(&self) -> bool {
    matches!(self, Outputs::Any)
  }

  pub fn is_empty(&self) -> bool {
    matches!(self, Outputs::Ports(ports) if ports.is_empty())
  }
}

/// Errors raised while a node processes its inputs.
#[derive(Debug, Error)]
pub enum NodeError {
  /// Not a failure: the run stops and the previous result stays authoritative.
  #[error("run halted: no changes detected")]
  Halt,

  #[error("io error: {0}")]
  Io(#[from] io::Error),

  #[error("{0}")]
  Failed(String),

  #[error("placeholder '{0}' was never substituted")]
  Unsubstituted(String),

  #[error("embedded graph '{graph}' failed: {source}")]
  Subgraph {
    graph: String,
    #[source]
    source: Box<GraphError>,
  },
}

impl NodeError {
  pub fn failed(message: impl Into<String>) -> Self {
    NodeError::Failed(message.into())
  }
}

/// Clones a node behind a trait object.
///
/// Blanket-implemented for every `Node + Clone`, so graphs can be deep-copied
/// without sharing node state.
pub trait NodeClone {
  fn clone_node(&self) -> Box<dyn Node>;
}

impl<T> NodeClone for T
where
  T: Node + Clone + 'static,
{
  fn clone_node(&self) -> Box<dyn Node> {
    Box::new(self.clone())
  }
}

impl Clone for Box<dyn Node> {
  fn clone(&self) -> Self {
    self.clone_node()
  }
}

/// A computation unit in a graph.
pub trait Node: NodeClone + fmt::Debug + Send + Sync {
  /// Human-readable name used in errors and logs.
  fn label(&self) -> String;

  fn kind(&self) -> NodeKind {
    NodeKind::Transform
  }

  fn inputs(&self) -> Inputs {
    Inputs::single()
  }

  fn outputs(&self) -> Outputs {
    Outputs::single()
  }

  /// Nodes with side effects run even when nothing consumes their output.
  fn has_side_effects(&self) -> bool {
    false
  }

  /// Name of the macro argument this node stands in for, if it is a placeholder.
  fn placeholder_name(&self) -> Option<&str> {
    None
  }

  fn process(&self, inputs: PortMap) -> Result<PortMap, NodeError>;
}

/// Remove and return the sequence on `port`, or an empty one.
pub fn take_port(inputs: &mut PortMap, port: &str) -> Vec<Artifact> {
  inputs.remove(port).unwrap_or_default()
}
