//! Pass-through nodes spliced into watched graphs.

use std::collections::HashSet;

use tracing::debug;

use crate::artifact::{Artifact, PortMap};
use crate::node::{Inputs, Node, NodeError, Outputs};

use super::{ChangeSet, ChangeTracker, TrackerState};

/// Fingerprints source artifacts and records what changed.
#[derive(Debug, Clone)]
pub struct Listener {
  tracker: ChangeTracker,
}

impl Listener {
  pub(crate) fn new(tracker: ChangeTracker) -> Self {
    Self { tracker }
  }
}

impl Node for Listener {
  fn label(&self) -> String {
    "listener".to_string()
  }

  fn inputs(&self) -> Inputs {
    Inputs::Any
  }

  fn outputs(&self) -> Outputs {
    Outputs::Any
  }

  fn process(&self, inputs: PortMap) -> Result<PortMap, NodeError> {
    self.tracker.poll(&inputs)?;
    Ok(inputs)
  }
}

/// Halts unchanged runs; in partial mode forwards only changed artifacts.
#[derive(Debug, Clone)]
pub struct Enforcer {
  tracker: ChangeTracker,
}

impl Enforcer {
  pub(crate) fn new(tracker: ChangeTracker) -> Self {
    Self { tracker }
  }
}

impl Node for Enforcer {
  fn label(&self) -> String {
    "enforcer".to_string()
  }

  fn inputs(&self) -> Inputs {
    Inputs::Any
  }

  fn outputs(&self) -> Outputs {
    Outputs::Any
  }

  fn process(&self, inputs: PortMap) -> Result<PortMap, NodeError> {
    let inner = self.tracker.lock();
    match (&inner.state, &inner.pending) {
      (TrackerState::NoChanges, _) => Err(NodeError::Halt),
      (TrackerState::ChangesPending, Some((changes, _))) if inner.partial && !inner.force => {
        let delta: PortMap = inputs
          .into_iter()
          .map(|(port, artifacts)| {
            let changed = artifacts.into_iter().filter(|a| changes.is_changed(a.origin())).collect();
            (port, changed)
          })
          .collect();
        debug!(forwarded = delta.values().map(Vec::len).sum::<usize>(), "forwarding changed artifacts");
        Ok(delta)
      }
      _ => Ok(inputs),
    }
  }
}

/// Overlays a partial rebuild onto the previous result.
#[derive(Debug, Clone)]
pub struct MergeStage {
  tracker: ChangeTracker,
}

impl MergeStage {
  pub(crate) fn new(tracker: ChangeTracker) -> Self {
    Self { tracker }
  }
}

impl Node for MergeStage {
  fn label(&self) -> String {
    "merge-stage".to_string()
  }

  fn inputs(&self) -> Inputs {
    Inputs::Any
  }

  fn outputs(&self) -> Outputs {
    Outputs::Any
  }

  fn process(&self, inputs: PortMap) -> Result<PortMap, NodeError> {
    let inner = self.tracker.lock();
    match &inner.pending {
      Some((changes, _)) => Ok(merge_outputs(&inner.baseline, inputs, changes)),
      None => Ok(inputs),
    }
  }
}

/// Overlay `delta` onto `baseline`, matching artifacts by origin.
///
/// Per port: previous artifacts whose origin changed are replaced in place
/// by every fresh artifact of that origin; artifacts of removed origins are
/// dropped; all others are kept as they were. Fresh artifacts of origins the
/// port did not hold before are appended, and ports only present in the
/// delta are taken as is.
pub fn merge_outputs(baseline: &PortMap, mut delta: PortMap, changes: &ChangeSet) -> PortMap {
  let mut merged = PortMap::new();

  for (port, previous) in baseline {
    let fresh = delta.remove(port).unwrap_or_default();
    let mut placed: HashSet<String> = HashSet::new();
    let mut items: Vec<Artifact> = Vec::with_capacity(previous.len().max(fresh.len()));

    for artifact in previous {
      let origin = artifact.origin();
      if changes.is_removed(origin) {
        continue;
      }
      if fresh.iter().any(|a| a.origin() == origin) {
        if placed.insert(origin.to_string()) {
          items.extend(fresh.iter().filter(|a| a.origin() == origin).cloned());
        }
        continue;
      }
      if changes.is_changed(origin) {
        continue;
      }
      items.push(artifact.clone());
    }

    items.extend(fresh.into_iter().filter(|a| !placed.contains(a.origin())));
    merged.insert(port.clone(), items);
  }

  merged.extend(delta);
  merged
}
