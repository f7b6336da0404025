use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fmt::Formatter;
use std::rc::Rc;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::digest::HexDigest;
use crate::types::InventoryPath;

/// A bidirectional map between file ids, `HexDigest`, and the set of paths the id appears
/// at. The path side is authoritative: a path maps to exactly one id at a time. Used for
/// both the manifest and version state blocks of an inventory.
#[derive(Debug, Clone)]
pub struct PathBiMap {
    id_to_paths: HashMap<Rc<HexDigest>, HashSet<Rc<InventoryPath>>>,
    path_to_id: HashMap<Rc<InventoryPath>, Rc<HexDigest>>,
}

impl PathBiMap {
    pub fn new() -> Self {
        Self {
            id_to_paths: HashMap::new(),
            path_to_id: HashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            id_to_paths: HashMap::with_capacity(capacity),
            path_to_id: HashMap::with_capacity(capacity),
        }
    }

    /// Inserts a new id to path mapping. If the path already has a mapping, then the
    /// existing mapping is removed.
    pub fn insert(&mut self, id: HexDigest, path: InventoryPath) {
        self.insert_rc(Rc::new(id), Rc::new(path))
    }

    /// Same as `insert()` but accepts already reference counted values
    pub fn insert_rc(&mut self, id: Rc<HexDigest>, path: Rc<InventoryPath>) {
        if self.path_to_id.contains_key(&path) {
            self.remove_path(&path);
        }

        let entry = self.id_to_paths.entry(id);
        let id = entry.key().clone();

        entry.or_insert_with(HashSet::new).insert(path.clone());

        self.path_to_id.insert(path, id);
    }

    /// Inserts all of the path mappings for an id. This is used for deserialization.
    fn insert_multiple(&mut self, id: HexDigest, paths: Vec<InventoryPath>) {
        let id_ref = Rc::new(id);

        let set = self
            .id_to_paths
            .entry(id_ref.clone())
            .or_insert_with(HashSet::new);

        for path in paths {
            let path_ref = Rc::new(path);
            set.insert(path_ref.clone());
            self.path_to_id.insert(path_ref, id_ref.clone());
        }
    }

    /// Gets all of the paths associated with an id
    pub fn get_paths(&self, id: &HexDigest) -> Option<&HashSet<Rc<InventoryPath>>> {
        self.id_to_paths.get(id)
    }

    /// Gets the id associated with a path
    pub fn get_id(&self, path: &InventoryPath) -> Option<&Rc<HexDigest>> {
        self.path_to_id.get(path)
    }

    /// Gets the id and path references associated with a path
    pub fn get_path_id(&self, path: &InventoryPath) -> Option<(&Rc<InventoryPath>, &Rc<HexDigest>)> {
        self.path_to_id.get_key_value(path)
    }

    /// Gets the canonical reference counted value for an id
    pub fn get_id_rc(&self, id: &HexDigest) -> Option<&Rc<HexDigest>> {
        self.id_to_paths.get_key_value(id).map(|(id, _)| id)
    }

    /// True, if a mapping exists for the path
    pub fn contains_path(&self, path: &InventoryPath) -> bool {
        self.path_to_id.contains_key(path)
    }

    /// True, if a mapping exists for the id
    pub fn contains_id(&self, id: &HexDigest) -> bool {
        self.id_to_paths.contains_key(id)
    }

    /// Removes a path mapping, returning it if it existed. The id is dropped entirely
    /// when its last path is removed.
    pub fn remove_path(
        &mut self,
        path: &InventoryPath,
    ) -> Option<(Rc<InventoryPath>, Rc<HexDigest>)> {
        match self.path_to_id.remove_entry(path) {
            Some((path, id)) => {
                let mut remove = false;
                if let Some(paths) = self.id_to_paths.get_mut(&id) {
                    paths.remove(&path);
                    remove = paths.is_empty();
                }
                if remove {
                    self.id_to_paths.remove(&id);
                }
                Some((path, id))
            }
            None => None,
        }
    }

    /// Iterates over all path to id mappings
    pub fn iter(&self) -> impl Iterator<Item = (&Rc<InventoryPath>, &Rc<HexDigest>)> {
        self.path_to_id.iter()
    }

    /// Iterates over all of the paths in the map
    pub fn paths(&self) -> impl Iterator<Item = &Rc<InventoryPath>> {
        self.path_to_id.keys()
    }

    pub fn len(&self) -> usize {
        self.path_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path_to_id.is_empty()
    }
}

impl Default for PathBiMap {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for PathBiMap {
    fn eq(&self, other: &Self) -> bool {
        self.path_to_id == other.path_to_id
    }
}

impl Eq for PathBiMap {}

struct PathBiMapVisitor {}

impl<'a> Visitor<'a> for PathBiMapVisitor {
    type Value = PathBiMap;

    fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
        formatter.write_str("a map of digests to paths")
    }

    fn visit_map<M: MapAccess<'a>>(self, mut access: M) -> Result<Self::Value, M::Error> {
        let mut map = PathBiMap::with_capacity(access.size_hint().unwrap_or(0));

        while let Some((key, value)) = access.next_entry()? {
            map.insert_multiple(key, value);
        }

        Ok(map)
    }
}

impl<'a> Deserialize<'a> for PathBiMap {
    fn deserialize<D: Deserializer<'a>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(PathBiMapVisitor {})
    }
}

impl Serialize for PathBiMap {
    /// Serializes with sorted ids and paths so that output bytes are reproducible
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut sorted: BTreeMap<&HexDigest, Vec<&InventoryPath>> = BTreeMap::new();

        for (id, paths) in &self.id_to_paths {
            let mut paths: Vec<&InventoryPath> = paths.iter().map(Rc::as_ref).collect();
            paths.sort();
            sorted.insert(id, paths);
        }

        serializer.collect_map(sorted)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::convert::TryInto;
    use std::hash::Hash;
    use std::rc::Rc;

    use crate::bimap::PathBiMap;
    use crate::digest::HexDigest;
    use crate::types::InventoryPath;

    #[test]
    fn insert_retrieve_remove() {
        let mut map = PathBiMap::new();
        map.insert("abcd".into(), path("foo/bar"));
        map.insert("efgh".into(), path("foo/baz"));
        map.insert("abcd".into(), path("2"));

        assert_eq!(
            &set(vec![path_rc("foo/bar"), path_rc("2")]),
            map.get_paths(&"abcd".into()).unwrap()
        );

        assert_eq!(
            &set(vec![path_rc("foo/baz")]),
            map.get_paths(&"efgh".into()).unwrap()
        );

        assert_eq!(&hex_rc("abcd"), map.get_id(&path("2")).unwrap());
        assert_eq!(&hex_rc("efgh"), map.get_id(&path("foo/baz")).unwrap());
        assert_eq!(&hex_rc("abcd"), map.get_id(&path("foo/bar")).unwrap());

        assert_eq!(None, map.get_id(&path("bogus")));
        assert_eq!(None, map.get_paths(&"bogus".into()));

        assert!(map.contains_id(&"abcd".into()));
        assert!(map.contains_path(&path("foo/bar")));
        assert!(!map.contains_id(&"bogus".into()));
        assert!(!map.contains_path(&path("bogus")));

        let removed = map.remove_path(&path("foo/baz")).unwrap();
        assert_eq!((path_rc("foo/baz"), hex_rc("efgh")), removed);

        assert!(!map.contains_id(&"efgh".into()));
        assert!(!map.contains_path(&path("foo/baz")));

        map.remove_path(&path("foo/bar"));

        assert_eq!(
            &set(vec![path_rc("2")]),
            map.get_paths(&"abcd".into()).unwrap()
        );
    }

    #[test]
    fn insert_existing_path_supersedes() {
        let mut map = PathBiMap::new();
        map.insert("abcd".into(), path("foo/bar"));
        map.insert("123".into(), path("foo/bar"));

        assert!(!map.contains_id(&"abcd".into()));
        assert_eq!(&hex_rc("123"), map.get_id(&path("foo/bar")).unwrap());
    }

    #[test]
    fn remove_missing_path_is_noop() {
        let mut map = PathBiMap::new();
        map.insert("abcd".into(), path("foo/bar"));

        assert_eq!(None, map.remove_path(&path("bogus")));
        assert_eq!(1, map.len());
    }

    #[test]
    fn serialize_sorted() {
        let mut map = PathBiMap::new();
        map.insert("efgh".into(), path("foo/baz"));
        map.insert("abcd".into(), path("foo/bar"));
        map.insert("abcd".into(), path("2"));

        let json = serde_json::to_string(&map).unwrap();

        assert_eq!(r#"{"abcd":["2","foo/bar"],"efgh":["foo/baz"]}"#, json);

        let value: PathBiMap = serde_json::from_str(&json).unwrap();

        assert_eq!(map, value);
    }

    #[test]
    fn serialize_empty() {
        let map = PathBiMap::new();

        let json = serde_json::to_string(&map).unwrap();

        assert_eq!("{}", json);

        let value: PathBiMap = serde_json::from_str(&json).unwrap();

        assert_eq!(map, value);
    }

    fn set<T: Eq + Hash>(vec: Vec<T>) -> HashSet<T> {
        vec.into_iter().collect()
    }

    fn path(p: &str) -> InventoryPath {
        p.try_into().unwrap()
    }

    fn path_rc(p: &str) -> Rc<InventoryPath> {
        Rc::new(path(p))
    }

    fn hex_rc(d: &str) -> Rc<HexDigest> {
        Rc::new(HexDigest::from(d))
    }
}
