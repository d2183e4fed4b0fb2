//! Change tracking for incremental rebuilds.
//!
//! A [`ChangeTracker`] is shared by three pass-through stages spliced into a
//! watched graph:
//!
//! - [`Listener`], right after the source: fingerprints the current source
//!   artifacts and diffs them against the set committed by the last
//!   successful run.
//! - [`Enforcer`], after the listener: halts the run when nothing changed and,
//!   in partial mode, forwards only added and modified artifacts.
//! - [`MergeStage`], in front of the result (partial mode only): overlays the
//!   freshly built artifacts onto the previous result by origin.
//!
//! Every run starts from the cached result of its own cache key through
//! [`ChangeTracker::begin`], so argument variants of one graph never see each
//! other's baseline. Fingerprints only become the new baseline through
//! [`ChangeTracker::commit`], which the environment calls after a run
//! succeeded.

mod stages;

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::artifact::{Artifact, ArtifactData, Fingerprint, FingerprintSet, PortMap, file_stat};
use crate::cache::CacheEntry;

pub use stages::{Enforcer, Listener, MergeStage, merge_outputs};

/// Where a tracked source is in its poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
  /// No poll in progress.
  Idle,
  /// Fingerprinting the current sources.
  Listening,
  /// The last poll found changes; the run continues.
  ChangesPending,
  /// The last poll found nothing; the run halts.
  NoChanges,
}

impl fmt::Display for TrackerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      TrackerState::Idle => "idle",
      TrackerState::Listening => "listening",
      TrackerState::ChangesPending => "changes-pending",
      TrackerState::NoChanges => "no-changes",
    };
    write!(f, "{s}")
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
  Unchanged,
  Modified,
  Added,
  Removed,
}

/// Classification of every source artifact, keyed by origin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
  changes: BTreeMap<String, ChangeKind>,
}

impl ChangeSet {
  /// Diff `current` fingerprints against `previous` ones.
  pub fn diff(previous: &FingerprintSet, current: &FingerprintSet) -> Self {
    let mut changes = BTreeMap::new();
    for (origin, fingerprint) in current {
      let kind = match previous.get(origin) {
        None => ChangeKind::Added,
        Some(prev) if !prev.same_content(fingerprint) => ChangeKind::Modified,
        Some(_) => ChangeKind::Unchanged,
      };
      changes.insert(origin.clone(), kind);
    }
    for origin in previous.keys().filter(|o| !current.contains_key(*o)) {
      changes.insert(origin.clone(), ChangeKind::Removed);
    }
    Self { changes }
  }

  pub fn kind(&self, origin: &str) -> Option<ChangeKind> {
    self.changes.get(origin).copied()
  }

  /// True if nothing was added, modified or removed.
  pub fn is_empty(&self) -> bool {
    self.changes.values().all(|k| *k == ChangeKind::Unchanged)
  }

  /// Added or modified.
  pub fn is_changed(&self, origin: &str) -> bool {
    matches!(self.kind(origin), Some(ChangeKind::Added | ChangeKind::Modified))
  }

  pub fn is_removed(&self, origin: &str) -> bool {
    self.kind(origin) == Some(ChangeKind::Removed)
  }

  pub fn count(&self, kind: ChangeKind) -> usize {
    self.changes.values().filter(|k| **k == kind).count()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, ChangeKind)> {
    self.changes.iter().map(|(origin, kind)| (origin.as_str(), *kind))
  }
}

#[derive(Debug)]
struct TrackerInner {
  state: TrackerState,
  partial: bool,
  trust_mtime: bool,
  /// No cached result exists for the run in progress: build everything.
  force: bool,
  committed: FingerprintSet,
  baseline: PortMap,
  pending: Option<(ChangeSet, FingerprintSet)>,
}

/// Shared change-detection state of one watched graph.
///
/// Clones share state.
#[derive(Debug, Clone)]
pub struct ChangeTracker {
  inner: Arc<Mutex<TrackerInner>>,
}

impl ChangeTracker {
  pub fn new(partial: bool, trust_mtime: bool) -> Self {
    Self {
      inner: Arc::new(Mutex::new(TrackerInner {
        state: TrackerState::Idle,
        partial,
        trust_mtime,
        force: false,
        committed: FingerprintSet::new(),
        baseline: PortMap::new(),
        pending: None,
      })),
    }
  }

  pub fn listener(&self) -> Listener {
    Listener::new(self.clone())
  }

  pub fn enforcer(&self) -> Enforcer {
    Enforcer::new(self.clone())
  }

  pub fn merge_stage(&self) -> MergeStage {
    MergeStage::new(self.clone())
  }

  pub fn state(&self) -> TrackerState {
    self.lock().state
  }

  pub fn is_partial(&self) -> bool {
    self.lock().partial
  }

  /// Fingerprints from the last committed run.
  pub fn committed(&self) -> FingerprintSet {
    self.lock().committed.clone()
  }

  /// Changes found by the poll in progress, if any.
  pub fn pending_changes(&self) -> Option<ChangeSet> {
    self.lock().pending.as_ref().map(|(changes, _)| changes.clone())
  }

  /// Start a run from the cached result of its own cache key.
  ///
  /// Without an entry the run is forced: nothing is halted and every source
  /// artifact is forwarded, so the first run of each key always builds.
  pub fn begin(&self, entry: Option<&CacheEntry>) {
    let mut inner = self.lock();
    match entry {
      Some(entry) => {
        inner.committed = entry.fingerprints.clone();
        inner.baseline = entry.outputs.clone();
        inner.force = false;
      }
      None => {
        inner.committed.clear();
        inner.baseline.clear();
        inner.force = true;
      }
    }
    inner.pending = None;
    inner.state = TrackerState::Idle;
  }

  /// True while the run in progress has no cached result to compare with.
  pub fn is_forced(&self) -> bool {
    self.lock().force
  }

  /// Make the pending fingerprints and `outputs` the new baseline.
  ///
  /// Returns the committed fingerprints.
  pub fn commit(&self, outputs: &PortMap) -> FingerprintSet {
    let mut inner = self.lock();
    if let Some((_, fingerprints)) = inner.pending.take() {
      inner.committed = fingerprints;
    }
    inner.baseline = outputs.clone();
    inner.force = false;
    inner.state = TrackerState::Idle;
    inner.committed.clone()
  }

  /// Discard the poll in progress, keeping the previous baseline.
  pub fn abort(&self) {
    let mut inner = self.lock();
    inner.pending = None;
    inner.state = TrackerState::Idle;
  }

  /// Forget the baseline: the next run rebuilds everything.
  pub fn reset(&self) {
    let mut inner = self.lock();
    inner.committed.clear();
    inner.baseline.clear();
    inner.pending = None;
    inner.force = false;
    inner.state = TrackerState::Idle;
  }

  /// Fingerprint the current sources and diff them against the baseline.
  fn poll(&self, artifacts: &PortMap) -> io::Result<ChangeSet> {
    let mut inner = self.lock();
    inner.state = TrackerState::Listening;

    let mut current = FingerprintSet::new();
    for artifact in artifacts.values().flatten() {
      let fingerprint = match fingerprint(artifact, &inner.committed, inner.trust_mtime) {
        Ok(fingerprint) => fingerprint,
        Err(e) => {
          inner.state = TrackerState::Idle;
          return Err(e);
        }
      };
      current.insert(artifact.origin().to_string(), fingerprint);
    }

    let changes = ChangeSet::diff(&inner.committed, &current);
    inner.state = if changes.is_empty() && !inner.force {
      TrackerState::NoChanges
    } else {
      TrackerState::ChangesPending
    };
    debug!(
      added = changes.count(ChangeKind::Added),
      modified = changes.count(ChangeKind::Modified),
      removed = changes.count(ChangeKind::Removed),
      state = %inner.state,
      "polled sources"
    );
    inner.pending = Some((changes.clone(), current));
    Ok(changes)
  }

  fn lock(&self) -> MutexGuard<'_, TrackerInner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Current fingerprint of a source artifact.
///
/// Files are re-read from disk. With `trust_mtime`, a file whose size and
/// modification time match its committed fingerprint is not re-hashed.
fn fingerprint(artifact: &Artifact, committed: &FingerprintSet, trust_mtime: bool) -> io::Result<Fingerprint> {
  let ArtifactData::File(path) = artifact.data() else {
    return Ok(artifact.fingerprint().clone());
  };

  if trust_mtime && let Some(previous) = committed.get(artifact.origin()) {
    let (size, mtime) = file_stat(path)?;
    if previous.mtime.is_some() && previous.mtime == mtime && previous.size == size {
      return Ok(previous.clone());
    }
  }
  Fingerprint::of_file(path)
}
