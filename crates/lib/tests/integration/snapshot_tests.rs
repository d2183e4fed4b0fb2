//! Cache snapshots: save in one environment, load in another.

use kiln_lib::consts::DEFAULT_PORT;
use kiln_lib::snapshot::{SnapshotError, read_snapshot};
use kiln_lib::{EnvConfig, EnvError, Environment};

use super::common::{TestEnv, Upper, upper_graph};

#[test]
fn load_reproduces_every_graph_without_building() {
  let env = TestEnv::new();
  env.write_src("a.js", "var a;");
  env.write_src("b.js", "var b;");
  let snapshot = env.path("snapshot.json");

  let mut builder = Environment::new(EnvConfig::default()).unwrap();
  builder.add(upper_graph("app.js", &env.src_path(), &Upper::default())).unwrap();
  builder.add(upper_graph("vendor.js", &env.src_path(), &Upper::default())).unwrap();
  builder.run_all().unwrap();
  builder.save(&snapshot).unwrap();

  let saved = read_snapshot(&snapshot).unwrap();
  assert_eq!(saved.graphs.keys().collect::<Vec<_>>(), vec!["app.js", "vendor.js"]);

  let upper = Upper::default();
  let mut consumer = Environment::new(EnvConfig::default()).unwrap();
  consumer.add(upper_graph("app.js", &env.src_path(), &upper)).unwrap();
  consumer.add(upper_graph("vendor.js", &env.src_path(), &upper)).unwrap();
  consumer.load(&snapshot).unwrap();

  for name in ["app.js", "vendor.js"] {
    let expected = builder.run(name).unwrap();
    let restored = consumer.run(name).unwrap();
    assert_eq!(restored, expected);
    let paths = |r: &kiln_lib::PortMap| -> Vec<(String, String)> {
      r[DEFAULT_PORT]
        .iter()
        .map(|a| (a.path().to_string(), a.fingerprint().hash.to_string()))
        .collect()
    };
    assert_eq!(paths(&restored), paths(&expected));
  }
  assert_eq!(upper.processed(), 0);
}

#[test]
fn watching_restart_keeps_unchanged_results() {
  let env = TestEnv::new();
  env.write_src("a.js", "var a;");
  let snapshot = env.path("snapshot.json");

  let mut first = Environment::new(env.watch_config(false)).unwrap();
  first.add(upper_graph("app.js", &env.src_path(), &Upper::default())).unwrap();
  let built = first.run("app.js").unwrap();
  first.save(&snapshot).unwrap();

  let upper = Upper::default();
  let mut restarted = Environment::new(env.watch_config(false)).unwrap();
  restarted.add(upper_graph("app.js", &env.src_path(), &upper)).unwrap();
  restarted.load(&snapshot).unwrap();

  assert_eq!(restarted.run("app.js").unwrap(), built);
  assert_eq!(upper.processed(), 0);

  env.write_src("a.js", "var a = 1;");
  restarted.run("app.js").unwrap();
  assert_eq!(upper.processed(), 1);
}

#[test]
fn unsupported_snapshot_version_is_rejected() {
  let env = TestEnv::new();
  let snapshot = env.path("snapshot.json");
  std::fs::write(&snapshot, r#"{"version": 99, "created_at": 0, "graphs": {}, "sources": {}}"#).unwrap();

  let kiln = Environment::new(EnvConfig::default()).unwrap();
  let err = kiln.load(&snapshot).unwrap_err();
  assert!(matches!(err, EnvError::Snapshot(SnapshotError::UnsupportedVersion(99))));
}
