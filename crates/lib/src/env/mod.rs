//! The build environment: a registry of named graphs and their cached results.
//!
//! [`Environment`] owns every registered graph, wires change tracking into
//! graphs added while watching, composes them with the default output graph,
//! and serves results from the [`ResultCache`]. A graph only executes when its
//! cache entry is missing or, in watch mode, when its sources changed.

mod config;
mod types;
mod watch_loop;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::artifact::PortMap;
use crate::cache::{CacheEntry, CacheKey, ResultCache};
use crate::consts::{ALL_PORTS, DEFAULT_PORT};
use crate::graph::{Graph, GraphError, GraphNode, NodeId};
use crate::node::{Inputs, Node, Outputs, UrlNode, WriteNode};
use crate::snapshot::{read_snapshot, write_snapshot};
use crate::util::hash::Hashable;
use crate::watch::ChangeTracker;

pub use config::{ConfigError, DEFAULT_CACHE_FILE, EnvConfig};
pub use types::{AddOptions, EnvError, WatchEvent};
pub use watch_loop::WatchHandle;

use types::RunOutcome;

/// A registered graph and its per-graph state.
#[derive(Debug)]
struct Registered {
  name: String,
  graph: Graph,
  tracker: Option<ChangeTracker>,
  /// Serializes runs of this graph, so a commit is never interleaved.
  lock: Mutex<()>,
}

/// Where a generated file lives and which graph produced it.
#[derive(Debug, Clone)]
struct Generated {
  graph: String,
  path: PathBuf,
}

#[derive(Debug)]
pub struct Environment {
  config: EnvConfig,
  cache: ResultCache,
  graphs: Vec<Registered>,
  index: HashMap<String, usize>,
  default_output: Option<Graph>,
  generated: RwLock<HashMap<String, Generated>>,
}

impl Environment {
  /// An environment using the cache backend selected by `config`.
  pub fn new(config: EnvConfig) -> Result<Self, EnvError> {
    let cache = ResultCache::from_config(&config.cache)?;
    Ok(Self::with_cache(config, cache))
  }

  pub fn with_cache(config: EnvConfig, cache: ResultCache) -> Self {
    Self {
      config,
      cache,
      graphs: Vec::new(),
      index: HashMap::new(),
      default_output: None,
      generated: RwLock::new(HashMap::new()),
    }
  }

  pub fn config(&self) -> &EnvConfig {
    &self.config
  }

  pub fn cache(&self) -> &ResultCache {
    &self.cache
  }

  /// Registered graph names, in registration order.
  pub fn graph_names(&self) -> impl Iterator<Item = &str> {
    self.graphs.iter().map(|g| g.name.as_str())
  }

  /// The graph as registered: watch stages and default output included.
  pub fn graph(&self, name: &str) -> Option<&Graph> {
    self.registered(name).ok().map(|g| &g.graph)
  }

  pub fn tracker(&self, name: &str) -> Option<&ChangeTracker> {
    self.registered(name).ok().and_then(|g| g.tracker.as_ref())
  }

  /// Graph every later registration feeds its result into.
  pub fn set_default_output(&mut self, graph: Graph) {
    self.default_output = Some(graph);
  }

  /// The conventional output graph: assign URLs under `url_prefix`, then
  /// write every artifact under `output_dir`.
  pub fn standard_output(config: &EnvConfig) -> Result<Graph, GraphError> {
    let mut graph = Graph::new("output");
    let url = graph.add(UrlNode::new(config.url_prefix.clone()))?;
    let write = graph.add(WriteNode::new(config.output_dir.clone()))?;
    graph.pipe(graph.source(), url)?;
    graph.pipe(url, write)?;
    Ok(graph)
  }

  /// Register `graph` with the configured defaults.
  pub fn add(&mut self, graph: Graph) -> Result<(), EnvError> {
    self.add_graph(graph, AddOptions::default())
  }

  /// Register `graph` under its name.
  ///
  /// While watching, a listener and an enforcer are spliced after the
  /// graph's source, and in partial mode a merge stage goes in front of the
  /// final result (after the default output, if any).
  pub fn add_graph(&mut self, graph: Graph, options: AddOptions) -> Result<(), EnvError> {
    let name = graph.name().to_string();
    if self.index.contains_key(&name) {
      return Err(EnvError::DuplicateGraph(name));
    }

    let mut probe = graph;
    probe.finalize()?;
    let source = probe.resolved_source();
    let mut user = probe.reopen();

    let partial = options.partial.unwrap_or(self.config.partial);
    let tracker = match (self.config.watch, source) {
      (true, Some(source)) => {
        let tracker = ChangeTracker::new(partial, self.config.trust_mtime);
        let listener = user.insert_after(source, tracker.listener())?;
        user.insert_after(listener, tracker.enforcer())?;
        Some(tracker)
      }
      (true, None) => {
        debug!(graph = %name, "no source to watch");
        None
      }
      _ => None,
    };

    let mut graph = match &self.default_output {
      Some(output) if !options.ignore_default_output => compose(&name, user, output.clone())?,
      _ => user,
    };
    if let Some(tracker) = tracker.as_ref().filter(|t| t.is_partial()) {
      graph.insert_before_sink(tracker.merge_stage())?;
    }
    graph.finalize()?;

    info!(
      graph = %name,
      watched = tracker.is_some(),
      partial = tracker.as_ref().is_some_and(|t| t.is_partial()),
      "registered graph"
    );
    self.index.insert(name.clone(), self.graphs.len());
    self.graphs.push(Registered {
      name,
      graph,
      tracker,
      lock: Mutex::new(()),
    });
    Ok(())
  }

  /// Result of `name` without run arguments.
  pub fn run(&self, name: &str) -> Result<PortMap, EnvError> {
    self.run_with(name, PortMap::new())
  }

  /// Result of `name` for `args`: cached when available, built otherwise.
  pub fn run_with(&self, name: &str, args: PortMap) -> Result<PortMap, EnvError> {
    self.run_inner(name, args).map(|(outputs, _)| outputs)
  }

  pub(crate) fn run_inner(&self, name: &str, args: PortMap) -> Result<(PortMap, RunOutcome), EnvError> {
    let entry = self.registered(name)?;
    let key = if args.is_empty() {
      CacheKey::graph(name)
    } else {
      CacheKey::with_args(name, args.compute_hash()?)
    };

    let _guard = entry.lock.lock().unwrap_or_else(PoisonError::into_inner);
    let cached = self.cache.get(&key)?;

    let Some(tracker) = &entry.tracker else {
      if let Some(hit) = cached {
        self.index_if_unknown(name, &hit.outputs);
        return Ok((hit.outputs, RunOutcome::Cached));
      }
      let outputs = entry.graph.run(args)?;
      self.cache.put(&key, &CacheEntry::new(outputs.clone()))?;
      self.record_generated(name, &outputs);
      debug!(graph = %name, key = %key, "built graph");
      return Ok((outputs, RunOutcome::Built));
    };

    tracker.begin(cached.as_ref());
    match entry.graph.run(args) {
      Ok(outputs) => {
        let fingerprints = tracker.commit(&outputs);
        self.cache.put(
          &key,
          &CacheEntry {
            outputs: outputs.clone(),
            fingerprints,
          },
        )?;
        self.record_generated(name, &outputs);
        debug!(graph = %name, key = %key, "rebuilt watched graph");
        Ok((outputs, RunOutcome::Built))
      }
      Err(GraphError::Halted { .. }) => {
        tracker.abort();
        debug!(graph = %name, "sources unchanged");
        let outputs = cached.map(|e| e.outputs).unwrap_or_default();
        self.index_if_unknown(name, &outputs);
        Ok((outputs, RunOutcome::Unchanged))
      }
      Err(e) => {
        tracker.abort();
        Err(e.into())
      }
    }
  }

  /// Run every graph once, in registration order.
  ///
  /// A failing graph does not stop the others; all failures are reported
  /// together as [`EnvError::MultiRun`].
  pub fn run_all(&self) -> Result<(), EnvError> {
    let mut failures = Vec::new();
    for registered in &self.graphs {
      if let Err(e) = self.run(&registered.name) {
        warn!(graph = %registered.name, error = %e, "graph failed");
        failures.push((registered.name.clone(), e));
      }
    }
    self.finish_all(failures)
  }

  /// Run every graph once on at most `parallelism` blocking workers.
  ///
  /// Failures are reported in registration order, like [`Environment::run_all`].
  pub async fn run_all_concurrent(self: &Arc<Self>, parallelism: usize) -> Result<(), EnvError> {
    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut join_set = JoinSet::new();

    for (idx, registered) in self.graphs.iter().enumerate() {
      let env = Arc::clone(self);
      let semaphore = Arc::clone(&semaphore);
      let name = registered.name.clone();
      join_set.spawn(async move {
        let result = match semaphore.acquire_owned().await {
          Ok(permit) => {
            let worker_name = name.clone();
            let joined = tokio::task::spawn_blocking(move || {
              let _permit = permit;
              env.run(&worker_name)
            })
            .await;
            joined.unwrap_or_else(|e| Err(EnvError::Worker(e.to_string())))
          }
          Err(e) => Err(EnvError::Worker(e.to_string())),
        };
        (idx, name, result)
      });
    }

    let mut results: Vec<Option<(String, EnvError)>> = (0..self.graphs.len()).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((idx, name, Err(e))) => {
          warn!(graph = %name, error = %e, "graph failed");
          results[idx] = Some((name, e));
        }
        Ok((_, _, Ok(_))) => {}
        Err(e) => return Err(EnvError::Worker(e.to_string())),
      }
    }
    self.finish_all(results.into_iter().flatten().collect())
  }

  fn finish_all(&self, failures: Vec<(String, EnvError)>) -> Result<(), EnvError> {
    info!(
      graphs = self.graphs.len(),
      failed = failures.len(),
      "ran all graphs"
    );
    if failures.is_empty() {
      Ok(())
    } else {
      Err(EnvError::MultiRun { failures })
    }
  }

  /// Drop every cached result of `name`; the next run rebuilds it.
  pub fn clear(&self, name: &str) -> Result<(), EnvError> {
    let entry = self.registered(name)?;
    let _guard = entry.lock.lock().unwrap_or_else(PoisonError::into_inner);
    self.cache.remove_graph(name)?;
    if let Some(tracker) = &entry.tracker {
      tracker.reset();
    }
    self.forget_generated(name);
    debug!(graph = %name, "cleared cached results");
    Ok(())
  }

  pub fn clear_all(&self) -> Result<(), EnvError> {
    for registered in &self.graphs {
      self.clear(&registered.name)?;
    }
    Ok(())
  }

  /// On-disk location of a generated file, by logical path.
  ///
  /// A path no run has produced yet runs every graph first, so lookups work
  /// before any explicit run. While watching, a known file missing from disk
  /// triggers a rebuild of its graph.
  pub fn lookup(&self, path: &str) -> Result<Option<PathBuf>, EnvError> {
    let found = match self.generated_file(path) {
      Some(found) => found,
      None => {
        self.run_all()?;
        match self.generated_file(path) {
          Some(found) => found,
          None => return Ok(None),
        }
      }
    };
    if !self.config.watch || found.path.exists() {
      return Ok(Some(found.path));
    }

    info!(graph = %found.graph, path = %path, "generated file missing, rebuilding");
    self.clear(&found.graph)?;
    self.run(&found.graph)?;
    Ok(self.generated_file(path).map(|g| g.path))
  }

  /// Write every cached result to a snapshot file.
  pub fn save(&self, path: &Path) -> Result<(), EnvError> {
    write_snapshot(path, &self.cache.snapshot()?)?;
    Ok(())
  }

  /// Replace the cache with a snapshot file's content, without running anything.
  pub fn load(&self, path: &Path) -> Result<(), EnvError> {
    let snapshot = read_snapshot(path)?;
    let count = snapshot.graphs.len();
    self.cache.restore(snapshot)?;

    for registered in &self.graphs {
      if let Some(tracker) = &registered.tracker {
        tracker.reset();
      }
    }

    let entries = self.cache.entries()?;
    let mut generated = self.generated.write().unwrap_or_else(PoisonError::into_inner);
    generated.clear();
    for registered in &self.graphs {
      for (_, entry) in entries.iter().filter(|(key, _)| CacheKey::belongs_to(key, &registered.name)) {
        index_outputs(&mut generated, &registered.name, &entry.outputs);
      }
    }
    info!(graphs = count, "restored cache from snapshot");
    Ok(())
  }

  fn registered(&self, name: &str) -> Result<&Registered, EnvError> {
    self
      .index
      .get(name)
      .and_then(|&idx| self.graphs.get(idx))
      .ok_or_else(|| EnvError::UnknownGraph(name.to_string()))
  }

  /// Names of the graphs carrying a change tracker.
  pub(crate) fn watched(&self) -> Vec<String> {
    self
      .graphs
      .iter()
      .filter(|g| g.tracker.is_some())
      .map(|g| g.name.clone())
      .collect()
  }

  fn generated_file(&self, path: &str) -> Option<Generated> {
    let generated = self.generated.read().unwrap_or_else(PoisonError::into_inner);
    generated.get(path).cloned()
  }

  fn record_generated(&self, graph: &str, outputs: &PortMap) {
    let mut generated = self.generated.write().unwrap_or_else(PoisonError::into_inner);
    generated.retain(|_, g| g.graph != graph);
    index_outputs(&mut generated, graph, outputs);
  }

  /// Index a result served without building, unless the graph already is.
  fn index_if_unknown(&self, graph: &str, outputs: &PortMap) {
    let mut generated = self.generated.write().unwrap_or_else(PoisonError::into_inner);
    if !generated.values().any(|g| g.graph == graph) {
      index_outputs(&mut generated, graph, outputs);
    }
  }

  fn forget_generated(&self, graph: &str) {
    let mut generated = self.generated.write().unwrap_or_else(PoisonError::into_inner);
    generated.retain(|_, g| g.graph != graph);
  }
}

fn index_outputs(generated: &mut HashMap<String, Generated>, graph: &str, outputs: &PortMap) {
  for artifact in outputs.values().flatten() {
    generated.insert(
      artifact.path().to_string(),
      Generated {
        graph: graph.to_string(),
        path: artifact.full_path(),
      },
    );
  }
}

/// Feed `user`'s result into `output`, under `name`.
fn compose(name: &str, user: Graph, output: Graph) -> Result<Graph, GraphError> {
  let inner = GraphNode::new(user)?;
  let output = GraphNode::new(output.with_name(format!("{name}:output")))?;
  let accepts_args = !inner.inputs().is_empty();

  let mut wrapper = Graph::new(name);
  let inner = wrapper.add(inner)?;
  let output = wrapper.add(output)?;
  if accepts_args {
    let source = wrapper.source();
    forward(&mut wrapper, source, inner)?;
  }
  forward(&mut wrapper, inner, output)?;
  Ok(wrapper)
}

/// Connect every port `to` accepts from the same-named port of `from`.
fn forward(graph: &mut Graph, from: NodeId, to: NodeId) -> Result<(), GraphError> {
  let inputs = graph.node(to).map_or_else(Inputs::none, |n| n.inputs());
  let Inputs::Ports(specs) = inputs else {
    return graph.connect(from, ALL_PORTS, to, ALL_PORTS);
  };

  let outputs = graph.node(from).map_or_else(Outputs::none, |n| n.outputs());
  for spec in specs {
    let port = if outputs.provides(&spec.name) {
      Some(spec.name.clone())
    } else if spec.name == DEFAULT_PORT {
      outputs.fallback()
    } else {
      None
    };
    if let Some(port) = port {
      graph.connect(from, &port, to, &spec.name)?;
    }
  }
  Ok(())
}
