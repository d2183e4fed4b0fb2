//! Crate-wide constants.

/// Application name, used for environment variable prefixes and default paths.
pub const APP_NAME: &str = "kiln";

/// Name of the port used when an edge or argument does not name one.
pub const DEFAULT_PORT: &str = "default";

/// Wildcard port name: forwards every output port to the same-named input port.
pub const ALL_PORTS: &str = "*";

/// Length of the truncated object hash used for cache keys.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Maximum nesting depth when a macro substitute itself contains placeholders.
pub const MACRO_DEPTH_LIMIT: usize = 16;

/// Current version of the cache snapshot container.
pub const SNAPSHOT_VERSION: u32 = 1;
