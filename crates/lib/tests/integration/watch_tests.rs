//! Change tracking and partial rebuilds.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use kiln_lib::artifact::{Artifact, Fingerprint};
use kiln_lib::cache::CacheKey;
use kiln_lib::consts::DEFAULT_PORT;
use kiln_lib::node::{GlobNode, MapNode};
use kiln_lib::watch::TrackerState;
use kiln_lib::{AddOptions, Environment, Graph, NodeError, PortMap, WatchEvent};

use super::common::{TestEnv, Upper, contents, names, upper_graph};

fn hashes(result: &PortMap) -> Vec<String> {
  result[DEFAULT_PORT]
    .iter()
    .map(|a: &Artifact| a.fingerprint().hash.to_string())
    .collect()
}

#[test]
fn partial_rebuild_reprocesses_only_the_modified_file() {
  let env = TestEnv::new();
  env.write_src("a.js", "var a;");
  env.write_src("b.js", "var b;");

  let upper = Upper::default();
  let mut kiln = Environment::new(env.watch_config(true)).unwrap();
  kiln.add(upper_graph("app.js", &env.src_path(), &upper)).unwrap();

  let before = kiln.run("app.js").unwrap();
  assert_eq!(names(&before[DEFAULT_PORT]), vec!["a.js", "b.js"]);
  assert_eq!(upper.processed(), 2);

  env.write_src("a.js", "var a = 1;");
  let after = kiln.run("app.js").unwrap();
  assert_eq!(names(&after[DEFAULT_PORT]), vec!["a.js", "b.js"]);
  assert_eq!(contents(&after[DEFAULT_PORT]), vec!["VAR A = 1;", "VAR B;"]);
  assert_eq!(upper.processed(), 3);

  let (old, new) = (hashes(&before), hashes(&after));
  assert_ne!(old[0], new[0]);
  assert_eq!(old[1], new[1]);
  assert_eq!(after[DEFAULT_PORT][1], before[DEFAULT_PORT][1]);
}

#[test]
fn partial_rebuild_follows_additions_and_removals() {
  let env = TestEnv::new();
  env.write_src("a.js", "var a;");
  env.write_src("b.js", "var b;");

  let upper = Upper::default();
  let mut kiln = Environment::new(env.watch_config(true)).unwrap();
  kiln.add(upper_graph("app.js", &env.src_path(), &upper)).unwrap();
  kiln.run("app.js").unwrap();

  env.remove_src("b.js");
  let out = kiln.run("app.js").unwrap();
  assert_eq!(names(&out[DEFAULT_PORT]), vec!["a.js"]);
  assert_eq!(upper.processed(), 2);

  env.write_src("c.js", "var c;");
  let out = kiln.run("app.js").unwrap();
  assert_eq!(names(&out[DEFAULT_PORT]), vec!["a.js", "c.js"]);
  assert_eq!(contents(&out[DEFAULT_PORT]), vec!["VAR A;", "VAR C;"]);
  assert_eq!(upper.processed(), 3);
}

#[test]
fn full_rebuild_without_partial_mode() {
  let env = TestEnv::new();
  env.write_src("a.js", "var a;");
  env.write_src("b.js", "var b;");

  let upper = Upper::default();
  let mut kiln = Environment::new(env.watch_config(true)).unwrap();
  kiln
    .add_graph(
      upper_graph("app.js", &env.src_path(), &upper),
      AddOptions::default().partial(false),
    )
    .unwrap();
  kiln.run("app.js").unwrap();
  kiln.run("app.js").unwrap();
  assert_eq!(upper.processed(), 2);

  env.write_src("a.js", "var a = 1;");
  kiln.run("app.js").unwrap();
  assert_eq!(upper.processed(), 4);
  assert_eq!(kiln.tracker("app.js").unwrap().state(), TrackerState::Idle);
}

#[test]
fn lookup_rebuilds_missing_outputs() {
  let env = TestEnv::new();
  env.write_src("a.js", "var a;");
  env.write_src("b.js", "var b;");
  let config = env.watch_config(true);

  let upper = Upper::default();
  let mut kiln = Environment::new(config.clone()).unwrap();
  kiln.set_default_output(Environment::standard_output(&config).unwrap());
  kiln.add(upper_graph("app.js", &env.src_path(), &upper)).unwrap();
  kiln.run_all().unwrap();

  let written = env.output_path().join("b.js");
  assert_eq!(std::fs::read_to_string(&written).unwrap(), "VAR B;");

  std::fs::remove_file(&written).unwrap();
  assert_eq!(kiln.lookup("b.js").unwrap(), Some(written.clone()));
  assert_eq!(std::fs::read_to_string(&written).unwrap(), "VAR B;");
  assert_eq!(upper.processed(), 4);
}

#[tokio::test]
async fn watch_loop_reports_each_graph() {
  let env = TestEnv::new();
  env.write_src("a.js", "var a;");

  let mut kiln = Environment::new(env.watch_config(true)).unwrap();
  kiln.add(upper_graph("app.js", &env.src_path(), &Upper::default())).unwrap();
  kiln.add(upper_graph("lib.js", &env.src_path(), &Upper::default())).unwrap();
  let kiln = Arc::new(kiln);

  let mut handle = kiln.run_forever(Duration::from_millis(10), false);
  let first = handle.next_event().await.unwrap();
  let second = handle.next_event().await.unwrap();
  assert_eq!(first, WatchEvent::Rebuilt { graph: "app.js".into() });
  assert_eq!(second, WatchEvent::Rebuilt { graph: "lib.js".into() });
  handle.stop().await.unwrap();

  assert_eq!(contents(&kiln.run("lib.js").unwrap()[DEFAULT_PORT]), vec!["VAR A;"]);
}

/// Slow upper-casing stage recording how many runs are inside it at once.
#[derive(Clone, Default)]
struct Occupancy {
  active: Arc<AtomicUsize>,
  peak: Arc<AtomicUsize>,
}

impl Occupancy {
  fn node(&self) -> MapNode {
    let (active, peak) = (Arc::clone(&self.active), Arc::clone(&self.peak));
    MapNode::new("slow-upper", move |artifact: &Artifact| {
      let now = active.fetch_add(1, Ordering::SeqCst) + 1;
      peak.fetch_max(now, Ordering::SeqCst);
      let data = artifact.read().map_err(NodeError::from);
      std::thread::sleep(Duration::from_millis(30));
      active.fetch_sub(1, Ordering::SeqCst);
      Ok(artifact.with_data(data?.to_ascii_uppercase()))
    })
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn foreground_runs_and_watch_polls_are_serialized() {
  let env = TestEnv::new();
  env.write_src("a.js", "var a;");

  let occupancy = Occupancy::default();
  let mut graph = Graph::new("app.js");
  let glob = graph.add(GlobNode::new(env.src_path(), &["*.js"])).unwrap();
  let slow = graph.add(occupancy.node()).unwrap();
  graph.pipe(glob, slow).unwrap();

  let mut kiln = Environment::new(env.watch_config(false)).unwrap();
  kiln.add(graph).unwrap();
  let kiln = Arc::new(kiln);

  let mut handle = kiln.run_forever(Duration::from_millis(5), false);
  for i in 0..5 {
    let content = format!("var a = {i};");
    env.write_src("a.js", &content);
    let worker = Arc::clone(&kiln);
    let out = tokio::task::spawn_blocking(move || worker.run("app.js"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(contents(&out[DEFAULT_PORT]), vec![content.to_ascii_uppercase()]);
  }
  assert!(handle.try_event().is_some());
  handle.stop().await.unwrap();

  assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);
  let entry = kiln.cache().get(&CacheKey::graph("app.js")).unwrap().unwrap();
  assert_eq!(contents(&entry.outputs[DEFAULT_PORT]), vec!["VAR A = 4;"]);
  let committed: Vec<_> = entry.fingerprints.values().map(|f| f.hash.clone()).collect();
  assert_eq!(committed, vec![Fingerprint::of_bytes(b"var a = 4;").hash]);
}
