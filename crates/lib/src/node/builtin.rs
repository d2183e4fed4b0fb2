//! Generic built-in nodes: reading, filtering, concatenating and writing artifacts.
//!
//! Language-specific transformations (compilers, minifiers) are not provided
//! here; they are ordinary [`Node`] implementations supplied by callers.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

use crate::artifact::{Artifact, PortMap, default_port};
use crate::consts::DEFAULT_PORT;

use super::{Inputs, Node, NodeError, NodeKind, Outputs, PortSpec, take_port};

/// Pass-through node. Also used for a graph's implicit source and sink.
#[derive(Debug, Clone)]
pub struct NoopNode {
  name: String,
  kind: NodeKind,
}

impl NoopNode {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      kind: NodeKind::Noop,
    }
  }

  pub(crate) fn boundary(name: &str, kind: NodeKind) -> Self {
    Self {
      name: name.to_string(),
      kind,
    }
  }
}

impl Node for NoopNode {
  fn label(&self) -> String {
    self.name.clone()
  }

  fn kind(&self) -> NodeKind {
    self.kind
  }

  fn inputs(&self) -> Inputs {
    Inputs::Any
  }

  fn outputs(&self) -> Outputs {
    Outputs::Any
  }

  fn process(&self, inputs: PortMap) -> Result<PortMap, NodeError> {
    Ok(inputs)
  }
}

/// Stand-in for a node supplied at macro instantiation.
#[derive(Debug, Clone)]
pub struct PlaceholderNode {
  name: String,
}

impl PlaceholderNode {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }
}

impl Node for PlaceholderNode {
  fn label(&self) -> String {
    format!("placeholder:{}", self.name)
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Placeholder
  }

  fn inputs(&self) -> Inputs {
    Inputs::Any
  }

  fn outputs(&self) -> Outputs {
    Outputs::Any
  }

  fn placeholder_name(&self) -> Option<&str> {
    Some(&self.name)
  }

  fn process(&self, _inputs: PortMap) -> Result<PortMap, NodeError> {
    Err(NodeError::Unsubstituted(self.name.clone()))
  }
}

/// Source node producing every file under `root` that matches its patterns.
///
/// Patterns are applied in order and results deduplicated, so files matching
/// earlier patterns come first. A pattern containing `/` only matches inside
/// that subdirectory; a leading `!` removes previously matched files. Patterns
/// support `*` and `?` wildcards against the file name.
#[derive(Debug, Clone)]
pub struct GlobNode {
  root: PathBuf,
  patterns: Vec<String>,
  prefix: String,
}

impl GlobNode {
  pub fn new(root: impl Into<PathBuf>, patterns: &[&str]) -> Self {
    Self {
      root: root.into(),
      patterns: patterns.iter().map(|p| p.to_string()).collect(),
      prefix: String::new(),
    }
  }

  /// Only match files under this subdirectory of the root.
  pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.prefix = prefix.into().trim_matches('/').to_string();
    self
  }

  /// Relative paths of every matching file, in pattern order.
  pub fn files(&self) -> io::Result<Vec<String>> {
    if !self.root.is_dir() {
      return Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("glob root {} does not exist", self.root.display()),
      ));
    }

    let mut seen = HashSet::new();
    let mut ordered = Vec::new();

    for raw in &self.patterns {
      let (remove, pattern) = match raw.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, raw.as_str()),
      };
      let (dir, file_pattern) = match pattern.rfind('/') {
        Some(idx) => (&pattern[..idx], &pattern[idx + 1..]),
        None => ("", pattern),
      };

      let mut base = self.root.clone();
      for part in [self.prefix.as_str(), dir] {
        if !part.is_empty() {
          base = base.join(part);
        }
      }
      if !base.is_dir() {
        continue;
      }

      for entry in WalkDir::new(&base).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
          continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !wildcard_match(file_pattern, &name) {
          continue;
        }
        let rel = relative_path(&self.root, entry.path());
        if remove {
          if seen.remove(&rel) {
            ordered.retain(|r| r != &rel);
          }
        } else if seen.insert(rel.clone()) {
          ordered.push(rel);
        }
      }
    }

    Ok(ordered)
  }
}

impl Node for GlobNode {
  fn label(&self) -> String {
    format!("glob:{}", self.root.display())
  }

  fn kind(&self) -> NodeKind {
    NodeKind::Source
  }

  fn inputs(&self) -> Inputs {
    Inputs::none()
  }

  fn process(&self, _inputs: PortMap) -> Result<PortMap, NodeError> {
    let files = self.files()?;
    debug!(root = %self.root.display(), count = files.len(), "globbed source files");
    let artifacts = files
      .into_iter()
      .map(|rel| Artifact::from_file(&self.root, rel))
      .collect::<io::Result<Vec<_>>>()?;
    Ok(default_port(artifacts))
  }
}

fn relative_path(root: &Path, path: &Path) -> String {
  let rel = path.strip_prefix(root).unwrap_or(path);
  rel
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}

/// Match `name` against a pattern with `*` (any run) and `?` (any one char).
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
  let p: Vec<char> = pattern.chars().collect();
  let n: Vec<char> = name.chars().collect();
  let (mut pi, mut ni) = (0, 0);
  let mut star: Option<(usize, usize)> = None;

  while ni < n.len() {
    if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
      pi += 1;
      ni += 1;
    } else if pi < p.len() && p[pi] == '*' {
      star = Some((pi, ni));
      pi += 1;
    } else if let Some((sp, sn)) = star {
      pi = sp + 1;
      ni = sn + 1;
      star = Some((sp, sn + 1));
    } else {
      return false;
    }
  }
  while pi < p.len() && p[pi] == '*' {
    pi += 1;
  }
  pi == p.len()
}

/// Merge every edge into the default port into a single stream.
#[derive(Debug, Clone, Default)]
pub struct MergeNode;

impl MergeNode {
  pub fn new() -> Self {
    Self
  }
}

impl Node for MergeNode {
  fn label(&self) -> String {
    "merge".to_string()
  }

  fn inputs(&self) -> Inputs {
    Inputs::Ports(vec![PortSpec::multi(DEFAULT_PORT)])
  }

  fn process(&self, mut inputs: PortMap) -> Result<PortMap, NodeError> {
    Ok(default_port(take_port(&mut inputs, DEFAULT_PORT)))
  }
}

/// Concatenate the contents of every input into one artifact.
#[derive(Debug, Clone)]
pub struct ConcatNode {
  filename: String,
  separator: String,
}

impl ConcatNode {
  pub fn new(filename: impl Into<String>) -> Self {
    Self {
      filename: filename.into(),
      separator: "\n".to_string(),
    }
  }

  pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
    self.separator = separator.into();
    self
  }
}

impl Node for ConcatNode {
  fn label(&self) -> String {
    format!("concat:{}", self.filename)
  }

  fn process(&self, mut inputs: PortMap) -> Result<PortMap, NodeError> {
    let mut data = Vec::new();
    for (i, artifact) in take_port(&mut inputs, DEFAULT_PORT).iter().enumerate() {
      if i > 0 {
        data.extend_from_slice(self.separator.as_bytes());
      }
      data.extend(artifact.read()?);
    }
    Ok(default_port(vec![Artifact::from_bytes(self.filename.clone(), data)]))
  }
}

type Predicate = Arc<dyn Fn(&Artifact) -> bool + Send + Sync>;

/// Keep only artifacts matching a predicate.
#[derive(Clone)]
pub struct FilterNode {
  name: String,
  predicate: Predicate,
}

impl FilterNode {
  pub fn new(name: impl Into<String>, predicate: impl Fn(&Artifact) -> bool + Send + Sync + 'static) -> Self {
    Self {
      name: name.into(),
      predicate: Arc::new(predicate),
    }
  }
}

impl fmt::Debug for FilterNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FilterNode").field("name", &self.name).finish()
  }
}

impl Node for FilterNode {
  fn label(&self) -> String {
    self.name.clone()
  }

  fn process(&self, mut inputs: PortMap) -> Result<PortMap, NodeError> {
    let kept = take_port(&mut inputs, DEFAULT_PORT)
      .into_iter()
      .filter(|a| (self.predicate)(a))
      .collect();
    Ok(default_port(kept))
  }
}

type MapOp = Arc<dyn Fn(&Artifact) -> Result<Artifact, NodeError> + Send + Sync>;

/// Apply a function to every artifact.
#[derive(Clone)]
pub struct MapNode {
  name: String,
  op: MapOp,
}

impl MapNode {
  pub fn new(
    name: impl Into<String>,
    op: impl Fn(&Artifact) -> Result<Artifact, NodeError> + Send + Sync + 'static,
  ) -> Self {
    Self {
      name: name.into(),
      op: Arc::new(op),
    }
  }
}

impl fmt::Debug for MapNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MapNode").field("name", &self.name).finish()
  }
}

impl Node for MapNode {
  fn label(&self) -> String {
    self.name.clone()
  }

  fn process(&self, mut inputs: PortMap) -> Result<PortMap, NodeError> {
    let mapped = take_port(&mut inputs, DEFAULT_PORT)
      .iter()
      .map(|a| (self.op)(a))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(default_port(mapped))
  }
}

/// Split a stream into one output port per file extension (e.g. `".js"`).
///
/// Files without an extension go to the `""` port. If a default extension is
/// set, that extension's files are emitted on the default port instead.
#[derive(Debug, Clone, Default)]
pub struct SplitExtNode {
  default_ext: Option<String>,
}

impl SplitExtNode {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_default(ext: impl Into<String>) -> Self {
    Self {
      default_ext: Some(ext.into()),
    }
  }
}

impl Node for SplitExtNode {
  fn label(&self) -> String {
    "splitext".to_string()
  }

  fn outputs(&self) -> Outputs {
    Outputs::Any
  }

  fn process(&self, mut inputs: PortMap) -> Result<PortMap, NodeError> {
    let mut out = PortMap::new();
    for artifact in take_port(&mut inputs, DEFAULT_PORT) {
      let ext = extension(artifact.path());
      let port = match &self.default_ext {
        Some(default) if default == ext => DEFAULT_PORT.to_string(),
        _ => ext.to_string(),
      };
      out.entry(port).or_default().push(artifact);
    }
    Ok(out)
  }
}

fn extension(path: &str) -> &str {
  let name = path.rsplit('/').next().unwrap_or(path);
  match name.rfind('.') {
    Some(idx) if idx > 0 => &name[idx..],
    _ => "",
  }
}

/// Assign a public URL to every artifact.
#[derive(Debug, Clone, Default)]
pub struct UrlNode {
  prefix: String,
  bust: bool,
}

impl UrlNode {
  pub fn new(prefix: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      bust: false,
    }
  }

  /// Append a cache-busting query string derived from the content hash.
  pub fn with_cache_bust(mut self) -> Self {
    self.bust = true;
    self
  }

  fn url_for(&self, artifact: &Artifact) -> String {
    let prefix = self.prefix.trim_end_matches('/');
    let mut url = if prefix.is_empty() {
      artifact.path().to_string()
    } else {
      format!("{}/{}", prefix, artifact.path())
    };
    if self.bust {
      url.push('?');
      url.push_str(artifact.fingerprint().hash.short(8));
    }
    url
  }
}

impl Node for UrlNode {
  fn label(&self) -> String {
    "url".to_string()
  }

  fn process(&self, mut inputs: PortMap) -> Result<PortMap, NodeError> {
    let items = take_port(&mut inputs, DEFAULT_PORT)
      .iter()
      .map(|a| a.with_url(self.url_for(a)))
      .collect();
    Ok(default_port(items))
  }
}

/// Write every artifact under a directory.
///
/// Files are written atomically (temp file, then rename). The emitted
/// artifacts are rooted at the output directory.
#[derive(Debug, Clone)]
pub struct WriteNode {
  dir: PathBuf,
  dry_run: bool,
}

impl WriteNode {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self {
      dir: dir.into(),
      dry_run: false,
    }
  }

  /// Only log the destination paths; write nothing.
  pub fn dry_run(mut self) -> Self {
    self.dry_run = true;
    self
  }
}

impl Node for WriteNode {
  fn label(&self) -> String {
    format!("write:{}", self.dir.display())
  }

  fn has_side_effects(&self) -> bool {
    !self.dry_run
  }

  fn process(&self, mut inputs: PortMap) -> Result<PortMap, NodeError> {
    let mut written = Vec::new();
    for artifact in take_port(&mut inputs, DEFAULT_PORT) {
      let dest = self.dir.join(artifact.path());
      if self.dry_run {
        debug!(path = %dest.display(), "dry run: would write artifact");
      } else {
        write_atomic(&dest, &artifact.read()?)?;
        debug!(path = %dest.display(), "wrote artifact");
      }
      written.push(artifact.with_root(&self.dir));
    }
    Ok(default_port(written))
  }
}

fn write_atomic(dest: &Path, data: &[u8]) -> io::Result<()> {
  let parent = dest.parent().unwrap_or_else(|| Path::new("."));
  fs::create_dir_all(parent)?;
  let mut tmp = NamedTempFile::new_in(parent)?;
  tmp.write_all(data)?;
  tmp.persist(dest).map_err(|e| e.error)?;
  Ok(())
}
