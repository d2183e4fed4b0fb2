//! kiln-lib: a dependency-driven asset build engine
//!
//! Pipelines over file-like artifacts are described as graphs of nodes and
//! then executed, cached and incrementally re-executed as sources change:
//! - `Artifact`: immutable file-like unit flowing between nodes
//! - `Node`: computation unit with named input and output ports
//! - `Graph`: validated, deterministically ordered DAG, usable as a node
//! - `Macro`: graph template instantiated with concrete substitutes
//! - `ChangeTracker`: source fingerprinting for watch mode and partial rebuilds
//! - `ResultCache`: per-graph results in memory or sqlite, with snapshots
//! - `Environment`: registry of named graphs tying all of the above together

pub mod artifact;
pub mod cache;
pub mod consts;
pub mod env;
pub mod graph;
pub mod macros;
pub mod node;
pub mod snapshot;
pub mod util;
pub mod watch;

pub use artifact::{Artifact, Fingerprint, PortMap};
pub use env::{AddOptions, EnvConfig, EnvError, Environment, WatchEvent, WatchHandle};
pub use graph::{Graph, GraphError, GraphNode, NodeId};
pub use macros::{Macro, Substitute};
pub use node::{Node, NodeError, NodeKind};
