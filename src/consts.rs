//! File names and other literals shared across the crate.

/// Prefix of all namaste declaration files
pub const NAMASTE_PREFIX: &str = "0=";
/// Namaste value prefix for storage roots
pub const ROOT_NAMASTE_BASE: &str = "ocfl_";
/// Namaste value prefix for objects
pub const OBJECT_NAMASTE_BASE: &str = "ocfl_object_";

pub const INVENTORY_FILE: &str = "inventory.json";
pub const OCFL_LAYOUT_FILE: &str = "ocfl_layout.json";
pub const EXTENSIONS_DIR: &str = "extensions";
pub const EXTENSIONS_CONFIG_FILE: &str = "config.json";

pub const DEFAULT_CONTENT_DIR: &str = "content";

/// Temp file suffix used while swapping the root inventory
pub const INVENTORY_TMP_SUFFIX: &str = ".tmp";

/// Default number of workers used for bulk imports
pub const DEFAULT_PARALLELISM: usize = 10;
