use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::TryInto;
use std::rc::Rc;

use chrono::{DateTime, Local};
use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::bimap::PathBiMap;
use crate::consts::DEFAULT_CONTENT_DIR;
use crate::digest::{DigestAlgorithm, HexDigest};
use crate::error::{OcflError, Result};
use crate::types::{CommitMeta, FileRef, InventoryPath, SpecVersion, VersionNum};

/// OCFL inventory serialization object. All mutations go through a draft inventory owned
/// by a transaction; committed inventories are never modified in place.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    pub id: String,
    #[serde(rename = "type")]
    pub type_declaration: String,
    pub digest_algorithm: DigestAlgorithm,
    pub head: VersionNum,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_directory: Option<String>,
    manifest: PathBiMap,
    pub versions: BTreeMap<VersionNum, Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixity: Option<BTreeMap<String, BTreeMap<String, Vec<String>>>>,

    #[serde(skip)]
    /// Path to the object's root relative the storage root, `/` separated
    pub object_root: String,
}

/// Used to construct the inventory of a brand new object.
pub struct InventoryBuilder {
    id: String,
    spec_version: SpecVersion,
    digest_algorithm: DigestAlgorithm,
    head: VersionNum,
    content_directory: String,
    object_root: String,
}

/// OCFL version serialization object
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Version {
    pub created: DateTime<Local>,
    state: PathBiMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,

    /// All of the logical path parts that should be treated as directories
    #[serde(skip)]
    logical_dirs: OnceCell<HashSet<InventoryPath>>,
}

/// OCFL user serialization object
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct User {
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// The symmetric difference of two version states
#[derive(Debug, Default)]
pub struct StateDiff {
    /// Mappings present on the left side only
    pub left_only: Vec<(Rc<InventoryPath>, Rc<HexDigest>)>,
    /// Mappings present on the right side only
    pub right_only: Vec<(Rc<InventoryPath>, Rc<HexDigest>)>,
}

impl Inventory {
    /// Returns a new inventory builder
    pub fn builder(object_id: &str) -> InventoryBuilder {
        InventoryBuilder::new(object_id)
    }

    /// Creates the draft inventory of the next version. The new version's state is a copy
    /// of the current head's state, or empty when `clean_state` is set.
    pub fn next_version(&self, clean_state: bool) -> Result<Inventory> {
        let mut draft = self.clone();
        let version_num = draft.head.next()?;
        let version = match clean_state {
            true => Version::new_staged(),
            false => draft.head_version().clone_staged(),
        };
        draft.versions.insert(version_num, version);
        draft.head = version_num;

        Ok(draft)
    }

    /// Returns true if the HEAD version is equal to 1
    pub fn is_new(&self) -> bool {
        self.head.number == 1
    }

    /// Returns a reference to the HEAD version
    pub fn head_version(&self) -> &Version {
        // The head version must exist because it is validated when the inventory is created
        self.versions.get(&self.head).unwrap()
    }

    /// Returns a mutable reference to the HEAD version
    pub fn head_version_mut(&mut self) -> &mut Version {
        // The head version must exist because it is validated when the inventory is created
        self.versions.get_mut(&self.head).unwrap()
    }

    /// Returns a reference to the specified version or an error if it does not exist.
    pub fn get_version(&self, version_num: VersionNum) -> Result<&Version> {
        match self.versions.get(&version_num) {
            Some(v) => Ok(v),
            None => Err(OcflError::NotFound(format!(
                "Object {} version {}",
                self.id, version_num
            ))),
        }
    }

    /// The OCFL version the inventory declares itself under
    pub fn spec_version(&self) -> Result<SpecVersion> {
        SpecVersion::from_inventory_type(&self.type_declaration)
    }

    /// Returns true if the path exists in the manifest
    pub fn contains_content_path(&self, content_path: &InventoryPath) -> bool {
        self.manifest.contains_path(content_path)
    }

    /// Returns true if content with the digest already exists within the object
    pub fn contains_digest(&self, digest: &HexDigest) -> bool {
        self.manifest.contains_id(digest)
    }

    /// Returns the first content path associated with the specified digest, or an error if
    /// it does not exist.
    ///
    /// If `version_num` is specified, then the content path must exist in the specified
    /// version or earlier.
    ///
    /// If `logical_path` is specified and multiple content paths for the digest are found,
    /// then the path that maps directly to the logical path is selected, or the first if
    /// none match.
    pub fn content_path_for_digest(
        &self,
        digest: &HexDigest,
        version_num: Option<VersionNum>,
        logical_path: Option<&InventoryPath>,
    ) -> Result<&Rc<InventoryPath>> {
        let version_num = version_num.unwrap_or(self.head);

        match self.manifest.get_paths(digest) {
            Some(paths) => {
                let mut matches = Vec::new();

                for path in paths {
                    if let Some(slash) = path.as_ref().as_ref().find('/') {
                        let version_str = &path.as_ref().as_ref().as_str()[0..slash];
                        let version: VersionNum = version_str.try_into()?;

                        if version <= version_num {
                            matches.push(path);
                        }
                    }
                }

                if matches.is_empty() {
                    return Err(OcflError::InventoryCorrupted {
                        object_id: self.id.clone(),
                        message: format!("Digest {} is not mapped to any content paths", digest),
                    });
                } else if matches.len() > 1 {
                    if let Some(logical_path) = logical_path {
                        let suffix =
                            format!("/{}/{}", self.defaulted_content_dir(), logical_path);
                        for path in matches.iter() {
                            if path.as_ref().as_ref().ends_with(&suffix) {
                                return Ok(path);
                            }
                        }
                    }
                }

                Ok(matches.first().unwrap())
            }
            None => Err(OcflError::InventoryCorrupted {
                object_id: self.id.clone(),
                message: format!("Digest {} not found in manifest", digest),
            }),
        }
    }

    /// Returns the content path for the logical path, or a `NotFound` error if the path
    /// is not found.
    pub fn content_path_for_logical_path(
        &self,
        logical_path: &InventoryPath,
        version_num: Option<VersionNum>,
    ) -> Result<&Rc<InventoryPath>> {
        let version_num = version_num.unwrap_or(self.head);
        let version = self.get_version(version_num)?;

        let digest = match version.lookup_digest(logical_path) {
            Some(digest) => digest,
            None => {
                return Err(OcflError::NotFound(format!(
                    "Path {} not found in object {} version {}",
                    logical_path, self.id, version_num
                )))
            }
        };

        self.content_path_for_digest(digest, Some(version_num), Some(logical_path))
    }

    /// Lists every file in a version. Files are returned in no particular order.
    pub fn files(&self, version_num: Option<VersionNum>) -> Result<Vec<FileRef>> {
        let version_num = version_num.unwrap_or(self.head);
        let version = self.get_version(version_num)?;

        let mut files = Vec::with_capacity(version.state_len());

        for (logical_path, digest) in version.state_iter() {
            let content_path =
                self.content_path_for_digest(digest, Some(version_num), Some(logical_path))?;

            files.push(FileRef {
                logical_path: logical_path.clone(),
                digest: digest.clone(),
                content_path: content_path.clone(),
                version_num,
            });
        }

        Ok(files)
    }

    /// Adds a file to the manifest and the state of the HEAD version, returning false when
    /// the exact mapping already exists.
    ///
    /// The manifest only gains an entry when the object has never seen the digest before;
    /// re-added content is deduplicated against the existing entry. A logical path that
    /// was previously mapped to different content is superseded.
    ///
    /// `content_path` is where novel content was staged. It must have been produced by
    /// [`new_content_path_head`](Self::new_content_path_head); when `None`, a path is
    /// derived from the logical path. It is ignored when the digest is already known.
    pub fn add_file(
        &mut self,
        digest: HexDigest,
        logical_path: InventoryPath,
        content_path: Option<InventoryPath>,
        fixity: Option<&HashMap<DigestAlgorithm, HexDigest>>,
    ) -> Result<bool> {
        if let Some(existing) = self.head_version().lookup_digest(&logical_path) {
            if existing.as_ref() == &digest {
                return Ok(false);
            }
        }

        let digest_rc = match self.manifest.get_id_rc(&digest) {
            Some(digest_rc) => digest_rc.clone(),
            None => {
                // First occurrence of these bytes anywhere in the object
                let digest_rc = Rc::new(digest);
                let content_path = match content_path {
                    Some(content_path) => content_path,
                    None => self.new_content_path_head(&logical_path)?,
                };

                if let Some(fixity) = fixity {
                    for (algorithm, fixity_digest) in fixity {
                        self.add_fixity(&content_path, *algorithm, fixity_digest);
                    }
                }

                self.manifest
                    .insert_rc(digest_rc.clone(), Rc::new(content_path));
                digest_rc
            }
        };

        self.head_version_mut().add_file(digest_rc, logical_path)?;
        Ok(true)
    }

    /// Moves a logical path, or every path under a logical directory, to a new location
    /// within the HEAD version. Existing destinations are overwritten. Returns the moved
    /// pairs along with their digests so that staged content may be relocated to match.
    pub fn move_files(
        &mut self,
        src: &InventoryPath,
        dst: &InventoryPath,
    ) -> Result<Vec<(Rc<InventoryPath>, InventoryPath, Rc<HexDigest>)>> {
        let pairs = self.resolve_rebase_pairs(self.head, src, dst)?;
        let mut moved = Vec::with_capacity(pairs.len());

        for (from, to) in pairs {
            let head = self.head_version_mut();
            // The pair was resolved from the head state, so the digest must exist
            let digest = head.lookup_digest(&from).unwrap().clone();
            head.remove_file(&from);
            head.add_file(digest.clone(), to.clone())?;
            moved.push((from, to, digest));
        }

        Ok(moved)
    }

    /// Copies a logical path, or every path under a logical directory, to a new location
    /// in the HEAD version. The source may be read out of an earlier version. Existing
    /// destinations are overwritten.
    pub fn copy_files(
        &mut self,
        src_version_num: VersionNum,
        src: &InventoryPath,
        dst: &InventoryPath,
    ) -> Result<usize> {
        let pairs = self.resolve_rebase_pairs(src_version_num, src, dst)?;

        for (from, to) in &pairs {
            let digest = self
                .get_version(src_version_num)?
                .lookup_digest(from)
                .unwrap()
                .clone();
            self.head_version_mut().add_file(digest, to.clone())?;
        }

        Ok(pairs.len())
    }

    /// Removes a logical path, or every path under a logical directory, from the HEAD
    /// version's state. Missing paths are ignored. The manifest is only touched when the
    /// removed file was staged in the HEAD version and its content is now unreferenced;
    /// those content paths are returned so the staged files can be cleaned up.
    pub fn remove_files(
        &mut self,
        logical_path: &InventoryPath,
    ) -> Vec<(Rc<InventoryPath>, Option<InventoryPath>)> {
        let targets: Vec<Rc<InventoryPath>> = if self.head_version().is_file(logical_path) {
            vec![self
                .head_version()
                .state
                .get_path_id(logical_path)
                .unwrap()
                .0
                .clone()]
        } else {
            self.head_version().paths_with_prefix(logical_path.as_str())
        };

        let mut removed = Vec::with_capacity(targets.len());

        for target in targets {
            if let Some((path, digest)) = self.head_version_mut().remove_file(&target) {
                let mut removed_content = None;

                let still_referenced = self
                    .versions
                    .values()
                    .any(|version| version.contains_digest(&digest));

                if !still_referenced {
                    if let Some(content_path) = self.staged_content_path(&digest) {
                        self.manifest.remove_path(&content_path);
                        self.remove_fixity_for_content_path(&content_path);
                        removed_content = Some(content_path);
                    }
                }

                removed.push((path, removed_content));
            }
        }

        removed
    }

    /// Restores a logical path, or every path under a logical directory, as it existed in
    /// an earlier version into the HEAD version. Conflicting paths in the head are
    /// replaced. Returns the number of paths reinstated.
    pub fn reinstate_files(
        &mut self,
        version_num: VersionNum,
        logical_path: &InventoryPath,
    ) -> Result<usize> {
        self.copy_files(version_num, logical_path, logical_path)
    }

    /// Repoints a manifest content path at a new location, keeping its digest mapping.
    /// Used when a file that was staged in the HEAD version is renamed before commit.
    /// Returns false when the old path is not in the manifest.
    pub fn rename_content_path(&mut self, old: &InventoryPath, new: InventoryPath) -> bool {
        match self.manifest.remove_path(old) {
            Some((_, digest)) => {
                if self.manifest.contains_path(&new) {
                    // the destination's previous digest is evicted from the manifest
                    self.remove_fixity_for_content_path(&new);
                }
                self.rename_fixity_content_path(old, &new);
                self.manifest.insert_rc(digest, Rc::new(new));
                true
            }
            None => false,
        }
    }

    fn rename_fixity_content_path(&mut self, old: &InventoryPath, new: &InventoryPath) {
        if let Some(fixity) = &mut self.fixity {
            for digests in fixity.values_mut() {
                for paths in digests.values_mut() {
                    for path in paths.iter_mut() {
                        if path.as_str() == old.as_str() {
                            *path = new.as_str().to_string();
                        }
                    }
                }
            }
        }
    }

    /// Removes a logical path, or every path under a logical directory, from the state of
    /// every version. Digests that are no longer referenced by any version are dropped
    /// from the manifest and the fixity block; their content paths are returned so the
    /// underlying files can be deleted.
    pub fn purge_files(&mut self, logical_path: &InventoryPath) -> Vec<InventoryPath> {
        for version in self.versions.values_mut() {
            let targets: Vec<Rc<InventoryPath>> = if version.is_file(logical_path) {
                vec![logical_path.clone().into()]
            } else {
                version.paths_with_prefix(logical_path.as_str())
            };

            for target in targets {
                version.remove_file(&target);
            }
        }

        let orphaned: Vec<(Rc<InventoryPath>, Rc<HexDigest>)> = self
            .manifest
            .iter()
            .filter(|(_, digest)| {
                !self
                    .versions
                    .values()
                    .any(|version| version.contains_digest(digest))
            })
            .map(|(path, digest)| (path.clone(), digest.clone()))
            .collect();

        let mut removed = Vec::with_capacity(orphaned.len());

        for (content_path, _) in orphaned {
            self.manifest.remove_path(&content_path);
            self.remove_fixity_for_content_path(&content_path);
            removed.push(content_path.as_ref().clone());
        }

        removed
    }

    fn remove_fixity_for_content_path(&mut self, content_path: &InventoryPath) {
        if let Some(fixity) = &mut self.fixity {
            for digests in fixity.values_mut() {
                for paths in digests.values_mut() {
                    paths.retain(|path| path != content_path.as_str());
                }
                digests.retain(|_, paths| !paths.is_empty());
            }
            fixity.retain(|_, digests| !digests.is_empty());

            if fixity.is_empty() {
                self.fixity = None;
            }
        }
    }

    /// Computes the symmetric difference between the states of two versions.
    pub fn diff_state(&self, left: VersionNum, right: VersionNum) -> Result<StateDiff> {
        let left = self.get_version(left)?;
        let right = self.get_version(right)?;

        let mut diff = StateDiff::default();

        for (path, digest) in left.state_iter() {
            if right.lookup_digest(path) != Some(digest) {
                diff.left_only.push((path.clone(), digest.clone()));
            }
        }

        for (path, digest) in right.state_iter() {
            if left.lookup_digest(path) != Some(digest) {
                diff.right_only.push((path.clone(), digest.clone()));
            }
        }

        Ok(diff)
    }

    /// True if the HEAD version's state differs from the version before it. The first
    /// version always counts as changed.
    pub fn is_head_changed(&self) -> bool {
        if self.head.number == 1 {
            return true;
        }

        // previous() cannot fail when the head is greater than 1
        let previous = self.head.previous().unwrap();
        match self.versions.get(&previous) {
            Some(previous) => previous.state != self.head_version().state,
            None => true,
        }
    }

    /// Records a fixity digest for a content path. Duplicate entries are ignored.
    pub fn add_fixity(
        &mut self,
        content_path: &InventoryPath,
        algorithm: DigestAlgorithm,
        digest: &HexDigest,
    ) {
        let paths = self
            .fixity
            .get_or_insert_with(BTreeMap::new)
            .entry(algorithm.to_string())
            .or_insert_with(BTreeMap::new)
            .entry(digest.to_string())
            .or_insert_with(Vec::new);

        let content_path = content_path.as_str();
        if !paths.iter().any(|existing| existing == content_path) {
            paths.push(content_path.to_string());
        }
    }

    /// Returns all of the fixity digests recorded for a content path
    pub fn fixity_for_content_path(
        &self,
        content_path: &InventoryPath,
    ) -> HashMap<String, String> {
        let mut results = HashMap::new();

        if let Some(fixity) = &self.fixity {
            for (algorithm, digests) in fixity {
                for (digest, paths) in digests {
                    if paths.iter().any(|path| path == content_path.as_str()) {
                        results.insert(algorithm.clone(), digest.clone());
                    }
                }
            }
        }

        results
    }

    /// Returns the content path to stage new content at for the specified logical path
    /// within the HEAD version. The content path mirrors the logical path unless that
    /// location is already claimed by content that another logical path still references,
    /// in which case a numeric suffix is appended to keep the paths distinct.
    pub fn new_content_path_head(&self, logical_path: &InventoryPath) -> Result<InventoryPath> {
        let direct: InventoryPath = format!(
            "{}/{}/{}",
            self.head,
            self.defaulted_content_dir(),
            logical_path.as_ref()
        )
        .try_into()?;

        if !self.content_path_claimed(&direct, logical_path) {
            return Ok(direct);
        }

        let mut suffix = 1;
        loop {
            let candidate: InventoryPath = format!("{}-{}", direct, suffix).try_into()?;
            if !self.content_path_claimed(&candidate, logical_path) {
                return Ok(candidate);
            }
            suffix += 1;
        }
    }

    /// True if the content path maps to a digest that some logical path other than the
    /// one being superseded in the HEAD version still references. Inserting a new
    /// manifest entry at such a path would orphan the digest.
    fn content_path_claimed(
        &self,
        content_path: &InventoryPath,
        superseded: &InventoryPath,
    ) -> bool {
        match self.manifest.get_id(content_path) {
            Some(digest) => self.versions.iter().any(|(version_num, version)| {
                version.state_iter().any(|(path, existing)| {
                    existing.as_ref() == digest.as_ref()
                        && !(*version_num == self.head && path.as_ref() == superseded)
                })
            }),
            None => false,
        }
    }

    /// Returns the manifest content path for content that was staged in the HEAD
    /// version, or `None` when the digest's content belongs to an earlier version.
    pub fn staged_content_path(&self, digest: &HexDigest) -> Option<InventoryPath> {
        let prefix = format!("{}/", self.head);
        self.manifest
            .get_paths(digest)?
            .iter()
            .find(|path| path.as_str().starts_with(&prefix))
            .map(|path| path.as_ref().clone())
    }

    pub fn defaulted_content_dir(&self) -> &str {
        match &self.content_directory {
            Some(dir) => dir.as_str(),
            None => DEFAULT_CONTENT_DIR,
        }
    }

    /// Performs a spot check on the inventory to see if it appears valid. This is not an
    /// exhaustive check, and does not guarantee that the inventory is valid.
    pub fn validate(&self) -> Result<()> {
        if !self.versions.contains_key(&self.head) {
            return Err(OcflError::InventoryCorrupted {
                object_id: self.id.clone(),
                message: format!("HEAD version {} was not found", self.head),
            });
        }

        if !self.digest_algorithm.is_content() {
            return Err(OcflError::InvalidConfiguration(format!(
                "Algorithm {} cannot be used for content addressing",
                self.digest_algorithm
            )));
        }

        if let Some(dir) = &self.content_directory {
            if dir.is_empty() || dir == "." || dir == ".." || dir.contains('/') {
                return Err(OcflError::InvalidConfiguration(format!(
                    "Invalid content directory: {}",
                    dir
                )));
            }
        }

        Ok(())
    }

    fn resolve_rebase_pairs(
        &self,
        src_version_num: VersionNum,
        src: &InventoryPath,
        dst: &InventoryPath,
    ) -> Result<Vec<(Rc<InventoryPath>, InventoryPath)>> {
        let version = self.get_version(src_version_num)?;

        if version.is_file(src) {
            let (path, _) = version.state.get_path_id(src).unwrap();
            return Ok(vec![(path.clone(), dst.clone())]);
        }

        let matches = version.paths_with_prefix(src.as_str());

        if matches.is_empty() {
            return Err(OcflError::NotFound(format!(
                "Path {} not found in object {} version {}",
                src, self.id, src_version_num
            )));
        }

        Ok(matches
            .into_iter()
            .map(|path| {
                let rebased = path.rebase(src, dst);
                (path, rebased)
            })
            .collect())
    }
}

impl InventoryBuilder {
    pub fn new(object_id: &str) -> Self {
        Self {
            id: object_id.to_string(),
            spec_version: SpecVersion::default(),
            digest_algorithm: DigestAlgorithm::Sha512,
            head: VersionNum::with_width(1, 0),
            content_directory: DEFAULT_CONTENT_DIR.to_string(),
            object_root: "".to_string(),
        }
    }

    pub fn with_spec_version(mut self, spec_version: SpecVersion) -> Self {
        self.spec_version = spec_version;
        self
    }

    pub fn with_digest_algorithm(mut self, digest_algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = digest_algorithm;
        self
    }

    pub fn with_head(mut self, head: VersionNum) -> Self {
        self.head = head;
        self
    }

    pub fn with_content_directory(mut self, content_directory: &str) -> Self {
        self.content_directory = content_directory.to_string();
        self
    }

    pub fn with_object_root(mut self, object_root: &str) -> Self {
        self.object_root = object_root.to_string();
        self
    }

    pub fn build(self) -> Result<Inventory> {
        let mut versions = BTreeMap::new();
        versions.insert(self.head, Version::new_staged());

        let inventory = Inventory {
            id: self.id,
            type_declaration: self.spec_version.inventory_type(),
            digest_algorithm: self.digest_algorithm,
            head: self.head,
            content_directory: Some(self.content_directory),
            manifest: PathBiMap::new(),
            versions,
            fixity: None,
            object_root: self.object_root,
        };

        inventory.validate()?;

        Ok(inventory)
    }
}

impl Version {
    /// Create a new Version with an empty state
    pub fn new_staged() -> Self {
        Self::staged_version(PathBiMap::new())
    }

    /// Creates a new Version with a cloned state
    pub fn clone_staged(&self) -> Self {
        Self::staged_version(self.state.clone())
    }

    fn staged_version(state: PathBiMap) -> Self {
        Self {
            created: Local::now(),
            message: None,
            user: None,
            state,
            logical_dirs: OnceCell::default(),
        }
    }

    /// Stamps the commit metadata onto the version
    pub fn update_meta(&mut self, meta: &CommitMeta) {
        self.message = meta.message.clone();
        self.user = meta.user_name.clone().map(|name| User {
            name: Some(name),
            address: meta.user_address.clone(),
        });
        self.created = meta.created.unwrap_or_else(Local::now);
    }

    /// Returns non-consuming iterator for the version's state
    pub fn state_iter(&self) -> impl Iterator<Item = (&Rc<InventoryPath>, &Rc<HexDigest>)> {
        self.state.iter()
    }

    pub fn state_len(&self) -> usize {
        self.state.len()
    }

    /// Returns a reference to the digest associated to a logical path, or None if the
    /// logical path does not exist in the version's state.
    pub fn lookup_digest(&self, logical_path: &InventoryPath) -> Option<&Rc<HexDigest>> {
        self.state.get_id(logical_path)
    }

    /// Returns true if the specified path exists as either a logical file or directory
    pub fn exists(&self, path: &InventoryPath) -> bool {
        self.is_file(path) || self.is_dir(path)
    }

    /// Returns true if the specified path exists and is a logical file
    pub fn is_file(&self, path: &InventoryPath) -> bool {
        self.state.contains_path(path)
    }

    /// Returns true if the specified path exists and is a logical directory
    pub fn is_dir(&self, path: &InventoryPath) -> bool {
        self.get_logical_dirs().contains(path)
    }

    /// Returns true if the version's state contains an entry for the digest
    pub fn contains_digest(&self, digest: &HexDigest) -> bool {
        self.state.contains_id(digest)
    }

    /// Returns an error if the specified path conflicts with the existing state. A path
    /// conflicts if a portion of the path is interpreted as both a directory and a file.
    pub fn validate_non_conflicting(&self, path: &InventoryPath) -> Result<()> {
        if self.is_dir(path) {
            return Err(OcflError::IllegalState(format!(
                "Conflicting logical path {}: This path is already in use as a directory",
                path
            )));
        }

        for dir in create_logical_dirs(path) {
            if self.is_file(&dir) {
                return Err(OcflError::IllegalState(format!(
                    "Conflicting logical path {}: The path part {} is an existing logical file",
                    path, dir
                )));
            }
        }

        Ok(())
    }

    /// Returns a list of all of the paths that begin with the specified prefix
    pub fn paths_with_prefix(&self, prefix: &str) -> Vec<Rc<InventoryPath>> {
        let mut matches = Vec::new();

        let prefix = if !prefix.ends_with('/') && !prefix.is_empty() {
            Cow::Owned(format!("{}/", prefix))
        } else {
            prefix.into()
        };

        for (path, _digest) in self.state.iter() {
            if path.as_ref().as_ref().starts_with(prefix.as_ref()) {
                matches.push(path.clone());
            }
        }

        matches
    }

    /// Adds a new logical path to the version, and updates the logical directory set, if
    /// needed. A path that already maps to different content is superseded.
    fn add_file(&mut self, digest: Rc<HexDigest>, logical_path: InventoryPath) -> Result<()> {
        let logical_path = match self.state.get_path_id(&logical_path) {
            // Overwriting a logical file is not a conflict
            Some((existing, _)) => {
                let existing = existing.clone();
                self.state.insert_rc(digest, existing);
                return Ok(());
            }
            None => logical_path,
        };

        self.validate_non_conflicting(&logical_path)?;
        if let Some(dirs) = self.logical_dirs.get_mut() {
            dirs.extend(create_logical_dirs(&logical_path));
        }
        self.state.insert_rc(digest, Rc::new(logical_path));

        Ok(())
    }

    /// Removes a logical path from the version's state
    fn remove_file(&mut self, path: &InventoryPath) -> Option<(Rc<InventoryPath>, Rc<HexDigest>)> {
        // must invalidate the logical dirs
        if self.logical_dirs.get().is_some() {
            self.logical_dirs = OnceCell::default();
        }
        self.state.remove_path(path)
    }

    /// Initializes a HashSet containing all of the logical directories within a version.
    fn get_logical_dirs(&self) -> &HashSet<InventoryPath> {
        self.logical_dirs.get_or_init(|| {
            let mut dirs: HashSet<InventoryPath> = HashSet::with_capacity(self.state.len());
            // Add the root path
            dirs.insert("/".try_into().unwrap());

            for (path, _) in self.state.iter() {
                dirs.extend(create_logical_dirs(path));
            }

            dirs
        })
    }
}

fn create_logical_dirs(path: &InventoryPath) -> HashSet<InventoryPath> {
    let mut dirs = HashSet::new();

    let mut parent = path.parent();
    while parent.as_ref() != "" {
        let next = parent.parent();
        dirs.insert(parent);
        parent = next;
    }

    dirs
}
