//! Reusable graph templates.
//!
//! A [`Macro`] wraps a graph containing [`PlaceholderNode`]s. Instantiating it
//! swaps every placeholder for a concrete node or graph and rewrites the edges
//! touching it onto the substitute's ports, yielding a new unfinalized graph.
//!
//! [`PlaceholderNode`]: crate::node::PlaceholderNode

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::consts::{ALL_PORTS, DEFAULT_PORT, MACRO_DEPTH_LIMIT};
use crate::graph::{Graph, GraphError, GraphNode, NodeId};
use crate::node::{Inputs, Node};

/// What a placeholder is replaced with.
#[derive(Debug, Clone)]
pub enum Substitute {
  Node(Box<dyn Node>),
  /// Embedded as a [`GraphNode`]. Placeholders inside it are resolved from
  /// the same substitution map.
  Graph(Graph),
}

impl Substitute {
  pub fn node(node: impl Node + 'static) -> Self {
    Substitute::Node(Box::new(node))
  }

  pub fn graph(graph: Graph) -> Self {
    Substitute::Graph(graph)
  }
}

/// A graph template with named placeholders.
#[derive(Debug, Clone)]
pub struct Macro {
  template: Graph,
  placeholders: Vec<String>,
}

impl Macro {
  pub fn new(template: Graph) -> Self {
    let placeholders = template.placeholders().into_iter().map(|(_, name)| name).collect();
    Self {
      template,
      placeholders,
    }
  }

  pub fn name(&self) -> &str {
    self.template.name()
  }

  /// Placeholder names in insertion order.
  pub fn placeholders(&self) -> &[String] {
    &self.placeholders
  }

  /// Build a new graph with every placeholder replaced.
  ///
  /// Each use of a substitute gets its own deep copy, so separate
  /// instantiations never share node state.
  pub fn instantiate(&self, subs: &HashMap<String, Substitute>) -> Result<Graph, GraphError> {
    let mut used = HashSet::new();
    let graph = instantiate_graph(&self.template, subs, 0, &mut used)?;

    let mut unused: Vec<&String> = subs.keys().filter(|name| !used.contains(*name)).collect();
    unused.sort();
    if let Some(name) = unused.first() {
      return Err(GraphError::UnexpectedSubstitute(name.to_string()));
    }

    debug!(
      template = %self.template.name(),
      substitutes = used.len(),
      "instantiated macro"
    );
    Ok(graph)
  }
}

fn instantiate_graph(
  template: &Graph,
  subs: &HashMap<String, Substitute>,
  depth: usize,
  used: &mut HashSet<String>,
) -> Result<Graph, GraphError> {
  if depth > MACRO_DEPTH_LIMIT {
    return Err(GraphError::RecursionLimit {
      limit: MACRO_DEPTH_LIMIT,
    });
  }

  let mut graph = template.reopen();
  for (id, name) in graph.placeholders() {
    let node = resolve(&name, subs, depth, used)?;
    rewire(&mut graph, id, node.as_ref())?;
    graph.replace_node(id, node);
  }
  Ok(graph)
}

fn resolve(
  name: &str,
  subs: &HashMap<String, Substitute>,
  depth: usize,
  used: &mut HashSet<String>,
) -> Result<Box<dyn Node>, GraphError> {
  if depth > MACRO_DEPTH_LIMIT {
    return Err(GraphError::RecursionLimit {
      limit: MACRO_DEPTH_LIMIT,
    });
  }

  let sub = subs
    .get(name)
    .ok_or_else(|| GraphError::UnboundPlaceholder(name.to_string()))?;
  used.insert(name.to_string());

  match sub {
    Substitute::Node(node) => match node.placeholder_name() {
      // A placeholder standing in for another one.
      Some(alias) => resolve(alias, subs, depth + 1, used),
      None => Ok(node.clone()),
    },
    Substitute::Graph(graph) => {
      let resolved = if graph.placeholders().is_empty() {
        graph.clone()
      } else {
        instantiate_graph(graph, subs, depth + 1, used)?
      };
      Ok(Box::new(GraphNode::new(resolved)?))
    }
  }
}

/// Point every edge touching placeholder `id` at ports `node` provides.
///
/// A port name the substitute declares is kept. A reference to the default
/// port falls back to the substitute's default (or only) port. Anything else
/// is a mismatch.
fn rewire(graph: &mut Graph, id: NodeId, node: &dyn Node) -> Result<(), GraphError> {
  let inputs = node.inputs();
  let outputs = node.outputs();
  let mismatch = |port: &str| GraphError::PortMismatch {
    node: node.label(),
    port: port.to_string(),
  };

  for edge in graph.edges_mut().iter_mut() {
    if edge.to == id {
      if edge.to_port == ALL_PORTS {
        if !inputs.is_any() {
          return Err(mismatch(ALL_PORTS));
        }
      } else if inputs.port(&edge.to_port).is_none() {
        match inputs.fallback() {
          Some(spec) if edge.to_port == DEFAULT_PORT => edge.to_port = spec.name,
          _ => return Err(mismatch(&edge.to_port)),
        }
      }
    }

    if edge.from == id && edge.from_port != ALL_PORTS && !outputs.provides(&edge.from_port) {
      match outputs.fallback() {
        Some(port) if edge.from_port == DEFAULT_PORT => edge.from_port = port,
        _ => return Err(mismatch(&edge.from_port)),
      }
    }
  }

  if let Inputs::Ports(specs) = &inputs {
    for spec in specs.iter().filter(|s| !s.multi) {
      let wired = graph
        .edges()
        .iter()
        .filter(|e| e.to == id && e.to_port == spec.name)
        .count();
      if wired > 1 {
        return Err(GraphError::PortAlreadyConnected {
          node: node.label(),
          port: spec.name.clone(),
        });
      }
    }
  }
  Ok(())
}
