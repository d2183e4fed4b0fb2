//! Macro templates registered as independent graphs.

use std::collections::HashMap;

use kiln_lib::artifact::Artifact;
use kiln_lib::consts::DEFAULT_PORT;
use kiln_lib::node::{ConcatNode, FilterNode, GlobNode, MapNode, PlaceholderNode};
use kiln_lib::{EnvConfig, Environment, Graph, GraphError, Macro, Substitute};

use super::common::{TestEnv, Upper, contents, names};

/// `glob(src, *) -> compile -> concat(bundle)` with `compile` left open.
fn bundle_macro(src: &std::path::Path) -> Macro {
  let mut template = Graph::new("bundle");
  let glob = template.add(GlobNode::new(src, &["*"])).unwrap();
  let compile = template.add(PlaceholderNode::new("compile")).unwrap();
  let concat = template.add(ConcatNode::new("bundle").with_separator("|")).unwrap();
  template.pipe(glob, compile).unwrap();
  template.pipe(compile, concat).unwrap();
  Macro::new(template)
}

fn with(name: &str, sub: Substitute) -> HashMap<String, Substitute> {
  HashMap::from([(name.to_string(), sub)])
}

#[test]
fn instantiations_run_independently() {
  let env = TestEnv::new();
  env.write_src("a.js", "a");
  env.write_src("b.css", "b");
  let bundle = bundle_macro(&env.src_path());
  assert_eq!(bundle.placeholders(), ["compile".to_string()]);

  let upper = Upper::default();
  let js_only = FilterNode::new("js", |a: &Artifact| a.path().ends_with(".js"));

  let loud = bundle
    .instantiate(&with("compile", Substitute::node(upper.node())))
    .unwrap()
    .with_name("loud");
  let js = bundle
    .instantiate(&with("compile", Substitute::node(js_only)))
    .unwrap()
    .with_name("js");

  let mut kiln = Environment::new(EnvConfig::default()).unwrap();
  kiln.add(loud).unwrap();
  kiln.add(js).unwrap();
  kiln.run_all().unwrap();

  assert_eq!(contents(&kiln.run("loud").unwrap()[DEFAULT_PORT]), vec!["A|B"]);
  assert_eq!(contents(&kiln.run("js").unwrap()[DEFAULT_PORT]), vec!["a"]);
  assert_eq!(upper.processed(), 2);
}

#[test]
fn graph_substitutes_embed_whole_pipelines() {
  let env = TestEnv::new();
  env.write_src("a.js", "a");
  env.write_src("b.js", "b");
  let bundle = bundle_macro(&env.src_path());

  let upper = Upper::default();
  let mut compile = Graph::new("compile");
  let up = compile.add(upper.node()).unwrap();
  let rename = compile
    .add(MapNode::new("rename", |a: &Artifact| Ok(a.with_extension("min.js"))))
    .unwrap();
  compile.pipe(compile.source(), up).unwrap();
  compile.pipe(up, rename).unwrap();

  let mut graph = bundle
    .instantiate(&with("compile", Substitute::graph(compile)))
    .unwrap();
  graph.finalize().unwrap();
  let out = graph.run(Default::default()).unwrap();
  assert_eq!(names(&out[DEFAULT_PORT]), vec!["bundle"]);
  assert_eq!(contents(&out[DEFAULT_PORT]), vec!["A|B"]);
}

#[test]
fn unbound_placeholders_block_registration() {
  let env = TestEnv::new();
  let bundle = bundle_macro(&env.src_path());

  let err = bundle.instantiate(&HashMap::new()).unwrap_err();
  assert!(matches!(err, GraphError::UnboundPlaceholder(ref name) if name == "compile"));

  let mut template = Graph::new("open");
  let glob = template.add(GlobNode::new(env.src_path(), &["*"])).unwrap();
  let hole = template.add(PlaceholderNode::new("compile")).unwrap();
  template.pipe(glob, hole).unwrap();
  let mut kiln = Environment::new(EnvConfig::default()).unwrap();
  assert!(kiln.add(template).is_err());
}
