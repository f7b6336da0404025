//! Helpers for constructing store-relative paths. All paths are UTF-8 and `/` separated,
//! regardless of the platform the store runs on.

use crate::consts::*;
use crate::digest::DigestAlgorithm;
use crate::types::{SpecVersion, VersionNum};

/// Returns the path to `inventory.json` within the specified directory
pub fn inventory_path(dir: &str) -> String {
    join(dir, INVENTORY_FILE)
}

/// Returns the path to `inventory.json.ALGO` within the specified directory
pub fn sidecar_path(dir: &str, algorithm: DigestAlgorithm) -> String {
    join(dir, &sidecar_name(algorithm))
}

/// Returns the name of an inventory sidecar for the specified algorithm
pub fn sidecar_name(algorithm: DigestAlgorithm) -> String {
    format!("{}.{}", INVENTORY_FILE, algorithm)
}

/// Returns the path to an object's namaste file
pub fn object_namaste_path(object_root: &str, version: SpecVersion) -> String {
    join(object_root, &version.object_namaste().filename)
}

/// Returns the path to the version directory within the object root
pub fn version_path(object_root: &str, version_num: VersionNum) -> String {
    join(object_root, &version_num.to_string())
}

/// Returns a version's content directory
pub fn content_path(object_root: &str, version_num: VersionNum, content_dir: &str) -> String {
    join(&version_path(object_root, version_num), content_dir)
}

/// Returns the path to the `extensions` directory within the specified directory
pub fn extensions_path(dir: &str) -> String {
    join(dir, EXTENSIONS_DIR)
}

/// Returns the path to a layout extension's `config.json` within the storage root
pub fn layout_config_path(storage_root: &str, extension_name: &str) -> String {
    join(
        &join(&extensions_path(storage_root), extension_name),
        EXTENSIONS_CONFIG_FILE,
    )
}

/// Returns the path to `ocfl_layout.json`
pub fn ocfl_layout_path(storage_root: &str) -> String {
    join(storage_root, OCFL_LAYOUT_FILE)
}

/// Returns the path to the OCFL root namaste file
pub fn root_namaste_path(storage_root: &str, version: SpecVersion) -> String {
    join(storage_root, &version.root_namaste().filename)
}

/// Joins two string path parts, inserting a `/` if needed
pub fn join(part1: &str, part2: &str) -> String {
    let mut joined = match part1.ends_with('/') {
        true => part1[..part1.len() - 1].to_string(),
        false => part1.to_string(),
    };

    if !part2.is_empty() {
        if (!joined.is_empty() || part1 == "/") && !part2.starts_with('/') {
            joined.push('/');
        }
        joined.push_str(part2);
    }

    joined
}

/// Returns the parent of a `/` separated path, or `""` when the path has no parent
pub fn parent(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some((parent, _)) => parent,
        None => "",
    }
}

/// Returns the final component of a `/` separated path
pub fn filename(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    match path.rsplit_once('/') {
        Some((_, name)) => name,
        None => path,
    }
}
