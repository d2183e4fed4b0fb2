//! Graph execution and result caching through the environment.

use std::collections::HashMap;
use std::sync::Arc;

use kiln_lib::artifact::Artifact;
use kiln_lib::cache::CacheConfig;
use kiln_lib::consts::DEFAULT_PORT;
use kiln_lib::node::{ConcatNode, GlobNode, MapNode, NoopNode};
use kiln_lib::{EnvConfig, EnvError, Environment, Graph, GraphError, NodeError, NodeId};

use super::common::{TestEnv, Upper, contents, names, upper_graph};

fn failing_graph(name: &str, src: &std::path::Path) -> Graph {
  let mut graph = Graph::new(name);
  let glob = graph.add(GlobNode::new(src, &["*.js"])).unwrap();
  let fail = graph
    .add(MapNode::new("fail", |_: &Artifact| Err(NodeError::failed("boom"))))
    .unwrap();
  graph.pipe(glob, fail).unwrap();
  graph
}

#[test]
fn second_run_is_served_from_cache() {
  let env = TestEnv::new();
  env.write_src("a.js", "var a;");
  env.write_src("b.js", "var b;");

  let upper = Upper::default();
  let mut kiln = Environment::new(EnvConfig::default()).unwrap();
  kiln.add(upper_graph("app.js", &env.src_path(), &upper)).unwrap();

  let first = kiln.run("app.js").unwrap();
  let second = kiln.run("app.js").unwrap();

  assert_eq!(names(&first[DEFAULT_PORT]), vec!["a.js", "b.js"]);
  assert_eq!(contents(&first[DEFAULT_PORT]), vec!["VAR A;", "VAR B;"]);
  let prints = |r: &kiln_lib::PortMap| -> Vec<_> { r[DEFAULT_PORT].iter().map(|a| a.fingerprint().clone()).collect() };
  assert_eq!(prints(&first), prints(&second));
  assert_eq!(upper.processed(), 2);
}

#[test]
fn topological_order_respects_every_edge() {
  const N: usize = 12;
  let mut graph = Graph::new("dag");

  // Insert in reverse so node ids run against the dependency direction.
  let mut ids = vec![NodeId(0); N];
  for k in (0..N).rev() {
    ids[k] = graph.add(NoopNode::new(format!("n{k}"))).unwrap();
  }
  let mut edges = Vec::new();
  for j in 1..N {
    for i in 0..j {
      if i + 1 == j || (i * 31 + j * 17) % 5 == 0 {
        graph.connect(ids[i], DEFAULT_PORT, ids[j], DEFAULT_PORT).unwrap();
        edges.push((ids[i], ids[j]));
      }
    }
  }

  graph.finalize().unwrap();
  let order = graph.order().unwrap().to_vec();
  let position: HashMap<NodeId, usize> = order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
  for (from, to) in &edges {
    assert!(position[from] < position[to], "{from} must run before {to}");
  }

  graph.finalize().unwrap();
  assert_eq!(graph.order().unwrap(), order.as_slice());
}

#[test]
fn cycles_name_their_members() {
  let mut graph = Graph::new("loop");
  let a = graph.add(NoopNode::new("a")).unwrap();
  let b = graph.add(NoopNode::new("b")).unwrap();
  let c = graph.add(NoopNode::new("c")).unwrap();
  graph.connect(a, DEFAULT_PORT, b, DEFAULT_PORT).unwrap();
  graph.connect(b, DEFAULT_PORT, c, DEFAULT_PORT).unwrap();
  graph.connect(c, DEFAULT_PORT, a, DEFAULT_PORT).unwrap();

  let err = graph.finalize().unwrap_err();
  let GraphError::Cycle { nodes, .. } = err else {
    panic!("expected a cycle error, got {err:?}");
  };
  assert_eq!(nodes, vec!["a", "b", "c"]);
}

#[test]
fn run_all_isolates_failing_graphs() {
  let env = TestEnv::new();
  env.write_src("a.js", "var a;");

  let upper = Upper::default();
  let mut kiln = Environment::new(EnvConfig::default()).unwrap();
  kiln.add(failing_graph("broken.js", &env.src_path())).unwrap();
  kiln.add(upper_graph("app.js", &env.src_path(), &upper)).unwrap();

  let err = kiln.run_all().unwrap_err();
  let EnvError::MultiRun { failures } = &err else {
    panic!("expected aggregate error, got {err:?}");
  };
  assert_eq!(failures.len(), 1);
  assert_eq!(failures[0].0, "broken.js");
  assert!(matches!(
    failures[0].1,
    EnvError::Graph(GraphError::NodeFailed { ref node, .. }) if node == "fail"
  ));

  assert_eq!(upper.processed(), 1);
  assert!(kiln.cache().get(&kiln_lib::cache::CacheKey::graph("broken.js")).unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_run_all_matches_sequential() {
  let env = TestEnv::new();
  env.write_src("a.js", "var a;");
  env.write_src("b.js", "var b;");

  let uppers: Vec<Upper> = (0..4).map(|_| Upper::default()).collect();
  let mut kiln = Environment::new(EnvConfig::default()).unwrap();
  for (i, upper) in uppers.iter().enumerate() {
    kiln.add(upper_graph(&format!("g{i}"), &env.src_path(), upper)).unwrap();
  }
  kiln.add(failing_graph("broken", &env.src_path())).unwrap();
  let kiln = Arc::new(kiln);

  let err = kiln.run_all_concurrent(2).await.unwrap_err();
  let failed: Vec<&str> = err.failures().into_iter().map(|(name, _)| name).collect();
  assert_eq!(failed, vec!["broken"]);
  for upper in &uppers {
    assert_eq!(upper.processed(), 2);
  }
  assert_eq!(contents(&kiln.run("g3").unwrap()[DEFAULT_PORT]), vec!["VAR A;", "VAR B;"]);
}

#[test]
fn sqlite_cache_outlives_the_environment() {
  let env = TestEnv::new();
  env.write_src("a.js", "var a;");
  let config = EnvConfig {
    cache: CacheConfig::Sqlite {
      path: env.path("cache.sqlite"),
    },
    ..EnvConfig::default()
  };

  let first = {
    let upper = Upper::default();
    let mut kiln = Environment::new(config.clone()).unwrap();
    kiln.add(upper_graph("app.js", &env.src_path(), &upper)).unwrap();
    let out = kiln.run("app.js").unwrap();
    assert_eq!(upper.processed(), 1);
    out
  };

  let upper = Upper::default();
  let mut kiln = Environment::new(config).unwrap();
  kiln.add(upper_graph("app.js", &env.src_path(), &upper)).unwrap();
  assert_eq!(kiln.run("app.js").unwrap(), first);
  assert_eq!(upper.processed(), 0);
}

#[test]
fn default_output_writes_bundle() {
  let env = TestEnv::new();
  env.write_src("a.js", "var a;");
  env.write_src("b.js", "var b;");
  let config = EnvConfig {
    output_dir: env.output_path(),
    url_prefix: "/assets/".into(),
    ..EnvConfig::default()
  };

  let mut kiln = Environment::new(config.clone()).unwrap();
  kiln.set_default_output(Environment::standard_output(&config).unwrap());
  let mut graph = Graph::new("app.js");
  let glob = graph.add(GlobNode::new(env.src_path(), &["*.js"])).unwrap();
  let concat = graph.add(ConcatNode::new("app.js").with_separator(";\n")).unwrap();
  graph.pipe(glob, concat).unwrap();
  kiln.add(graph).unwrap();

  kiln.run_all().unwrap();
  let written = env.output_path().join("app.js");
  assert_eq!(std::fs::read_to_string(&written).unwrap(), "var a;;\nvar b;");
  assert_eq!(kiln.lookup("app.js").unwrap(), Some(written));
  let out = kiln.run("app.js").unwrap();
  assert_eq!(out[DEFAULT_PORT][0].url(), Some("/assets/app.js"));
}
