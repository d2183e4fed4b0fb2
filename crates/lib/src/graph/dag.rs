//! Scheduling DAG for graph finalization.
//!
//! Mirrors a graph's node and edge sets onto a petgraph [`DiGraph`] and
//! computes a deterministic topological order, cycle membership and
//! reachability.

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use super::types::NodeId;

pub(crate) struct Dag {
  graph: DiGraph<NodeId, ()>,
  indices: HashMap<NodeId, NodeIndex>,
}

impl Dag {
  /// Build a DAG over `nodes`. Edges touching unknown nodes are ignored.
  pub(crate) fn new(nodes: impl IntoIterator<Item = NodeId>, edges: impl IntoIterator<Item = (NodeId, NodeId)>) -> Self {
    let mut graph = DiGraph::new();
    let mut indices = HashMap::new();

    for id in nodes {
      let idx = graph.add_node(id);
      indices.insert(id, idx);
    }

    for (from, to) in edges {
      if let (Some(&a), Some(&b)) = (indices.get(&from), indices.get(&to)) {
        graph.add_edge(a, b, ());
      }
    }

    Self { graph, indices }
  }

  /// Nodes taking part in a cycle, grouped per strongly connected component.
  pub(crate) fn cycles(&self) -> Vec<Vec<NodeId>> {
    if toposort(&self.graph, None).is_ok() {
      return Vec::new();
    }

    let mut cycles: Vec<Vec<NodeId>> = tarjan_scc(&self.graph)
      .into_iter()
      .filter(|scc| scc.len() > 1 || scc.iter().any(|&n| self.graph.contains_edge(n, n)))
      .map(|scc| {
        let mut ids: Vec<NodeId> = scc.into_iter().map(|n| self.graph[n]).collect();
        ids.sort();
        ids
      })
      .collect();
    cycles.sort();
    cycles
  }

  /// Topological order, breaking ties by the smallest node id.
  ///
  /// Kahn's algorithm over a sorted ready set, so the order only depends on
  /// the node and edge sets. Returns `None` if the graph is cyclic.
  pub(crate) fn order(&self) -> Option<Vec<NodeId>> {
    let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
    for idx in self.graph.node_indices() {
      in_degree.insert(idx, self.graph.neighbors_directed(idx, Direction::Incoming).count());
    }

    let mut ready: BTreeSet<NodeId> = in_degree
      .iter()
      .filter(|&(_, &deg)| deg == 0)
      .map(|(&idx, _)| self.graph[idx])
      .collect();
    let mut order = Vec::with_capacity(self.graph.node_count());

    while let Some(id) = ready.pop_first() {
      order.push(id);
      let idx = self.indices[&id];
      for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
        if let Some(deg) = in_degree.get_mut(&neighbor) {
          *deg = deg.saturating_sub(1);
          if *deg == 0 {
            ready.insert(self.graph[neighbor]);
          }
        }
      }
    }

    (order.len() == self.graph.node_count()).then_some(order)
  }

  /// Every node from which one of `targets` is reachable, targets included.
  pub(crate) fn ancestors(&self, targets: impl IntoIterator<Item = NodeId>) -> HashSet<NodeId> {
    let mut seen = HashSet::new();
    let mut stack: Vec<NodeIndex> = targets.into_iter().filter_map(|id| self.indices.get(&id).copied()).collect();

    while let Some(idx) = stack.pop() {
      if !seen.insert(self.graph[idx]) {
        continue;
      }
      stack.extend(self.graph.neighbors_directed(idx, Direction::Incoming));
    }

    seen
  }
}
