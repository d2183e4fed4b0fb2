//! Portable snapshots of the result cache.
//!
//! A snapshot holds artifact metadata (not content) for every cached graph
//! result plus the committed source fingerprints of watched graphs. Loading
//! one lets an environment serve results without building anything.

mod storage;
mod types;

pub use storage::{read_snapshot, write_snapshot};
pub use types::{CacheSnapshot, SnapshotError};
