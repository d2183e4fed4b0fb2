//! Graphs of nodes connected by named ports.
//!
//! A [`Graph`] is mutable until [`Graph::finalize`] validates it and fixes a
//! deterministic execution order; after that it can only be run (or embedded
//! in another graph through [`GraphNode`]).
//!
//! Every new graph starts with two implicit pass-through nodes: a source that
//! receives the run arguments and a sink that collects the result. Finalize
//! drops either one when nothing is wired to it, in which case the graph's
//! own source-kind node and terminal node take their roles.

pub(crate) mod dag;
mod types;

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use tracing::{debug, error};

use crate::artifact::PortMap;
use crate::consts::{ALL_PORTS, DEFAULT_PORT};
use crate::node::{Inputs, Node, NodeError, NodeKind, NoopNode, Outputs};

use dag::Dag;

pub use types::{Edge, ErrorClass, GraphError, NodeId};

/// Execution plan fixed at finalize.
#[derive(Debug, Clone)]
struct Plan {
  order: Vec<NodeId>,
  live: HashSet<NodeId>,
  source: Option<NodeId>,
  sink: Option<NodeId>,
}

/// A DAG of nodes and the edges between their ports.
///
/// Cloning a graph deep-copies every node.
#[derive(Debug, Clone)]
pub struct Graph {
  name: String,
  nodes: Vec<Option<Box<dyn Node>>>,
  edges: Vec<Edge>,
  source: NodeId,
  sink: NodeId,
  plan: Option<Plan>,
}

impl Graph {
  pub fn new(name: impl Into<String>) -> Self {
    let nodes: Vec<Option<Box<dyn Node>>> = vec![
      Some(Box::new(NoopNode::boundary("source", NodeKind::Source))),
      Some(Box::new(NoopNode::boundary("sink", NodeKind::Sink))),
    ];
    Self {
      name: name.into(),
      nodes,
      edges: Vec::new(),
      source: NodeId(0),
      sink: NodeId(1),
      plan: None,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// The implicit source, fed by run arguments.
  pub fn source(&self) -> NodeId {
    self.source
  }

  /// The implicit sink, collecting the run result.
  pub fn sink(&self) -> NodeId {
    self.sink
  }

  pub fn is_finalized(&self) -> bool {
    self.plan.is_some()
  }

  pub fn add(&mut self, node: impl Node + 'static) -> Result<NodeId, GraphError> {
    self.add_boxed(Box::new(node))
  }

  pub fn add_boxed(&mut self, node: Box<dyn Node>) -> Result<NodeId, GraphError> {
    self.ensure_open()?;
    let id = NodeId(self.nodes.len());
    self.nodes.push(Some(node));
    Ok(id)
  }

  pub fn node(&self, id: NodeId) -> Option<&dyn Node> {
    self.nodes.get(id.0).and_then(|slot| slot.as_deref())
  }

  /// Connect `from`'s output port to `to`'s input port.
  ///
  /// Use `"*"` on both ends to forward every output port to the same-named
  /// input of a node accepting any port.
  pub fn connect(&mut self, from: NodeId, from_port: &str, to: NodeId, to_port: &str) -> Result<(), GraphError> {
    self.ensure_open()?;
    let src = self.require(from)?;
    let dst = self.require(to)?;

    if dst.kind() == NodeKind::Source {
      return Err(GraphError::PortMismatch {
        node: dst.label(),
        port: to_port.to_string(),
      });
    }

    if from_port == ALL_PORTS || to_port == ALL_PORTS {
      if from_port != to_port || !dst.inputs().is_any() {
        return Err(GraphError::InvalidWildcard { node: dst.label() });
      }
    } else {
      if !src.outputs().provides(from_port) {
        return Err(GraphError::PortMismatch {
          node: src.label(),
          port: from_port.to_string(),
        });
      }
      let spec = dst.inputs().port(to_port).ok_or_else(|| GraphError::PortMismatch {
        node: dst.label(),
        port: to_port.to_string(),
      })?;
      if !spec.multi && self.edges.iter().any(|e| e.to == to && e.to_port == to_port) {
        return Err(GraphError::PortAlreadyConnected {
          node: dst.label(),
          port: to_port.to_string(),
        });
      }
    }

    self.edges.push(Edge {
      from,
      from_port: from_port.to_string(),
      to,
      to_port: to_port.to_string(),
    });
    Ok(())
  }

  /// Connect the default (or only) ports of two nodes.
  pub fn pipe(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
    self.ensure_open()?;
    let src = self.require(from)?;
    let from_port = src.outputs().fallback().ok_or_else(|| GraphError::PortMismatch {
      node: src.label(),
      port: DEFAULT_PORT.to_string(),
    })?;
    let dst = self.require(to)?;
    let to_port = dst
      .inputs()
      .fallback()
      .map(|spec| spec.name)
      .ok_or_else(|| GraphError::PortMismatch {
        node: dst.label(),
        port: DEFAULT_PORT.to_string(),
      })?;
    self.connect(from, &from_port, to, &to_port)
  }

  /// Remove a node and every edge touching it.
  pub fn remove(&mut self, id: NodeId) -> Result<Box<dyn Node>, GraphError> {
    self.ensure_open()?;
    let Some(node) = self.nodes.get_mut(id.0).and_then(Option::take) else {
      return Err(self.unknown(id));
    };
    self.edges.retain(|e| e.from != id && e.to != id);
    Ok(node)
  }

  /// Splice a pass-through node directly after `id`.
  ///
  /// Every edge leaving `id` is re-routed to leave the new node instead, and
  /// `id` forwards all of its ports to it.
  pub fn insert_after(&mut self, id: NodeId, node: impl Node + 'static) -> Result<NodeId, GraphError> {
    self.ensure_open()?;
    self.require(id)?;
    if !node.inputs().is_any() || !node.outputs().is_any() {
      return Err(GraphError::InvalidWildcard { node: node.label() });
    }

    let new = self.add(node)?;
    for edge in self.edges.iter_mut().filter(|e| e.from == id) {
      edge.from = new;
    }
    self.edges.push(Edge {
      from: id,
      from_port: ALL_PORTS.to_string(),
      to: new,
      to_port: ALL_PORTS.to_string(),
    });
    Ok(new)
  }

  /// Splice a pass-through node in front of the graph's result.
  ///
  /// With the implicit sink wired, the node takes over its incoming edges.
  /// Otherwise it is appended after the terminal node and becomes the new
  /// terminal.
  pub fn insert_before_sink(&mut self, node: impl Node + 'static) -> Result<NodeId, GraphError> {
    self.ensure_open()?;
    let unwired = self.unwired_boundaries();
    let Some(sink) = self.resolve_sink(&unwired)? else {
      return Err(GraphError::NoSink {
        graph: self.name.clone(),
      });
    };
    if sink != self.sink {
      return self.insert_after(sink, node);
    }

    if !node.inputs().is_any() || !node.outputs().is_any() {
      return Err(GraphError::InvalidWildcard { node: node.label() });
    }
    let new = self.add(node)?;
    for edge in self.edges.iter_mut().filter(|e| e.to == sink) {
      edge.to = new;
    }
    self.edges.push(Edge {
      from: new,
      from_port: ALL_PORTS.to_string(),
      to: sink,
      to_port: ALL_PORTS.to_string(),
    });
    Ok(new)
  }

  /// Validate the graph and fix its execution order. Idempotent.
  pub fn finalize(&mut self) -> Result<(), GraphError> {
    if self.plan.is_some() {
      return Ok(());
    }

    let dropped = self.unwired_boundaries();
    let present: Vec<(NodeId, &dyn Node)> = self.present(&dropped).collect();

    if let Some(name) = present.iter().find_map(|(_, node)| node.placeholder_name()) {
      return Err(GraphError::UnboundPlaceholder(name.to_string()));
    }

    let sources: Vec<NodeId> = present
      .iter()
      .filter(|(_, node)| node.kind() == NodeKind::Source)
      .map(|(id, _)| *id)
      .collect();
    if sources.len() > 1 {
      return Err(GraphError::AmbiguousSource {
        graph: self.name.clone(),
        nodes: self.labels(&sources),
      });
    }

    for (id, node) in &present {
      if node.kind() == NodeKind::Source {
        continue;
      }
      if let Inputs::Ports(specs) = node.inputs() {
        for spec in specs.iter().filter(|s| s.required) {
          if !self.edges.iter().any(|e| e.to == *id && e.to_port == spec.name) {
            return Err(GraphError::MissingInput {
              graph: self.name.clone(),
              node: node.label(),
              port: spec.name.clone(),
            });
          }
        }
      }
    }

    let dag = Dag::new(present.iter().map(|(id, _)| *id), self.edges.iter().map(|e| (e.from, e.to)));
    let Some(order) = dag.order() else {
      let members: Vec<NodeId> = dag.cycles().into_iter().flatten().collect();
      return Err(GraphError::Cycle {
        graph: self.name.clone(),
        nodes: self.labels(&members),
      });
    };

    let sink = self.resolve_sink(&dropped)?;
    let mut targets: Vec<NodeId> = present
      .iter()
      .filter(|(_, node)| node.has_side_effects())
      .map(|(id, _)| *id)
      .collect();
    targets.extend(sink);
    let live = dag.ancestors(targets);

    for id in dropped {
      self.nodes[id.0] = None;
    }

    debug!(
      graph = %self.name,
      nodes = order.len(),
      live = live.len(),
      "finalized graph"
    );
    self.plan = Some(Plan {
      order,
      live,
      source: sources.first().copied(),
      sink,
    });
    Ok(())
  }

  /// Execution order, once finalized.
  pub fn order(&self) -> Option<&[NodeId]> {
    self.plan.as_ref().map(|p| p.order.as_slice())
  }

  /// The node receiving run arguments, once finalized.
  pub fn resolved_source(&self) -> Option<NodeId> {
    self.plan.as_ref().and_then(|p| p.source)
  }

  /// The node whose output is the run result, once finalized.
  pub fn resolved_sink(&self) -> Option<NodeId> {
    self.plan.as_ref().and_then(|p| p.sink)
  }

  pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &dyn Node)> + '_ {
    self
      .nodes
      .iter()
      .enumerate()
      .filter_map(|(i, slot)| slot.as_deref().map(|node| (NodeId(i), node)))
  }

  pub fn edges(&self) -> &[Edge] {
    &self.edges
  }

  /// Placeholder nodes in insertion order.
  pub fn placeholders(&self) -> Vec<(NodeId, String)> {
    self
      .nodes()
      .filter_map(|(id, node)| node.placeholder_name().map(|name| (id, name.to_string())))
      .collect()
  }

  pub fn has_side_effects(&self) -> bool {
    self.nodes().any(|(_, node)| node.has_side_effects())
  }

  /// Textual listing of nodes and edges for diagnostics.
  pub fn describe(&self) -> String {
    let mut out = format!("graph '{}'\n", self.name);
    for (id, node) in self.nodes() {
      let skipped = match &self.plan {
        Some(plan) if !plan.live.contains(&id) => " (skipped)",
        _ => "",
      };
      let _ = writeln!(out, "  {} {} [{}]{}", id, node.label(), node.kind(), skipped);
    }
    for edge in &self.edges {
      let _ = writeln!(out, "  {edge}");
    }
    out
  }

  /// Run the graph, returning the sink's output ports.
  ///
  /// `args` feed the source node. The unnamed argument (`"default"`) is only
  /// accepted when the source declares a default port; named arguments must
  /// match a declared source port.
  pub fn run(&self, args: PortMap) -> Result<PortMap, GraphError> {
    let plan = self
      .plan
      .as_ref()
      .ok_or_else(|| GraphError::NotFinalized(self.name.clone()))?;
    let mut args = Some(self.route_args(plan, args)?);
    let mut outputs: HashMap<NodeId, PortMap> = HashMap::new();

    for &id in &plan.order {
      let Some(node) = self.node(id) else {
        continue;
      };
      if !plan.live.contains(&id) {
        debug!(graph = %self.name, node = %node.label(), "skipping unused node");
        continue;
      }

      let inputs = if Some(id) == plan.source {
        args.take().unwrap_or_default()
      } else {
        self.gather(id, node, &outputs)
      };

      debug!(graph = %self.name, node = %node.label(), "running node");
      let produced = node.process(inputs).map_err(|e| match e {
        NodeError::Halt => {
          debug!(graph = %self.name, node = %node.label(), "run halted");
          GraphError::Halted {
            graph: self.name.clone(),
          }
        }
        source => {
          error!(graph = %self.name, node = %node.label(), error = %source, "node failed");
          GraphError::NodeFailed {
            graph: self.name.clone(),
            node: node.label(),
            source,
          }
        }
      })?;
      outputs.insert(id, produced);
    }

    Ok(plan.sink.and_then(|id| outputs.remove(&id)).unwrap_or_default())
  }

  /// An unfinalized copy keeping every node id, for further splicing.
  pub(crate) fn reopen(&self) -> Graph {
    Graph {
      plan: None,
      ..self.clone()
    }
  }

  pub(crate) fn replace_node(&mut self, id: NodeId, node: Box<dyn Node>) {
    if let Some(slot) = self.nodes.get_mut(id.0) {
      *slot = Some(node);
    }
  }

  pub(crate) fn edges_mut(&mut self) -> &mut Vec<Edge> {
    &mut self.edges
  }

  fn route_args(&self, plan: &Plan, args: PortMap) -> Result<PortMap, GraphError> {
    let Some(source) = plan.source.and_then(|id| self.node(id)) else {
      return match args.into_keys().next() {
        Some(port) => Err(GraphError::UnexpectedArgument {
          graph: self.name.clone(),
          port,
        }),
        None => Ok(PortMap::new()),
      };
    };

    let inputs = source.inputs();
    if let Some(port) = args.keys().find(|port| inputs.port(port).is_none()) {
      return Err(GraphError::UnexpectedArgument {
        graph: self.name.clone(),
        port: port.clone(),
      });
    }
    Ok(args)
  }

  fn gather(&self, id: NodeId, node: &dyn Node, outputs: &HashMap<NodeId, PortMap>) -> PortMap {
    let mut inputs = PortMap::new();
    if let Inputs::Ports(specs) = node.inputs() {
      for spec in specs {
        inputs.entry(spec.name).or_default();
      }
    }

    for edge in self.edges.iter().filter(|e| e.to == id) {
      let Some(upstream) = outputs.get(&edge.from) else {
        continue;
      };
      if edge.from_port == ALL_PORTS {
        for (port, artifacts) in upstream {
          inputs.entry(port.clone()).or_default().extend(artifacts.iter().cloned());
        }
      } else {
        let slot = inputs.entry(edge.to_port.clone()).or_default();
        if let Some(artifacts) = upstream.get(&edge.from_port) {
          slot.extend(artifacts.iter().cloned());
        }
      }
    }
    inputs
  }

  fn ensure_open(&self) -> Result<(), GraphError> {
    if self.plan.is_some() {
      return Err(GraphError::Frozen {
        graph: self.name.clone(),
      });
    }
    Ok(())
  }

  fn unknown(&self, id: NodeId) -> GraphError {
    GraphError::UnknownNode {
      graph: self.name.clone(),
      node: id,
    }
  }

  fn require(&self, id: NodeId) -> Result<&dyn Node, GraphError> {
    self.node(id).ok_or_else(|| self.unknown(id))
  }

  fn present<'a>(&'a self, dropped: &'a HashSet<NodeId>) -> impl Iterator<Item = (NodeId, &'a dyn Node)> + 'a {
    self.nodes().filter(move |(id, _)| !dropped.contains(id))
  }

  /// Implicit source and sink nodes with no edges.
  fn unwired_boundaries(&self) -> HashSet<NodeId> {
    [self.source, self.sink]
      .into_iter()
      .filter(|&id| self.node(id).is_some() && !self.edges.iter().any(|e| e.from == id || e.to == id))
      .collect()
  }

  fn resolve_sink(&self, dropped: &HashSet<NodeId>) -> Result<Option<NodeId>, GraphError> {
    if self.node(self.sink).is_some() && !dropped.contains(&self.sink) {
      return Ok(Some(self.sink));
    }

    let terminals: Vec<NodeId> = self
      .present(dropped)
      .filter(|(id, node)| !node.outputs().is_empty() && !self.edges.iter().any(|e| e.from == *id))
      .map(|(id, _)| id)
      .collect();

    match terminals.as_slice() {
      [] => Ok(None),
      [only] => Ok(Some(*only)),
      _ => Err(GraphError::AmbiguousSink {
        graph: self.name.clone(),
        nodes: self.labels(&terminals),
      }),
    }
  }

  fn labels(&self, ids: &[NodeId]) -> Vec<String> {
    ids
      .iter()
      .map(|&id| self.node(id).map_or_else(|| id.to_string(), |node| node.label()))
      .collect()
  }
}

/// A finalized graph used as a node inside another graph.
///
/// Its inputs are the embedded source's inputs and its outputs the embedded
/// sink's outputs.
#[derive(Debug, Clone)]
pub struct GraphNode {
  graph: Graph,
}

impl GraphNode {
  /// Wrap `graph`, finalizing it first if needed.
  pub fn new(mut graph: Graph) -> Result<Self, GraphError> {
    graph.finalize()?;
    Ok(Self { graph })
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }
}

impl Node for GraphNode {
  fn label(&self) -> String {
    self.graph.name.clone()
  }

  fn inputs(&self) -> Inputs {
    self
      .graph
      .resolved_source()
      .and_then(|id| self.graph.node(id))
      .map_or_else(Inputs::none, |node| node.inputs())
  }

  fn outputs(&self) -> Outputs {
    self
      .graph
      .resolved_sink()
      .and_then(|id| self.graph.node(id))
      .map_or_else(Outputs::none, |node| node.outputs())
  }

  fn has_side_effects(&self) -> bool {
    self.graph.has_side_effects()
  }

  fn process(&self, inputs: PortMap) -> Result<PortMap, NodeError> {
    // Ports the embedded source does not declare are dropped rather than rejected.
    let accepted = self.inputs();
    let args: PortMap = inputs
      .into_iter()
      .filter(|(port, _)| accepted.port(port).is_some())
      .collect();

    self.graph.run(args).map_err(|e| match e {
      GraphError::Halted { .. } => NodeError::Halt,
      other => NodeError::Subgraph {
        graph: self.graph.name.clone(),
        source: Box::new(other),
      },
    })
  }
}
