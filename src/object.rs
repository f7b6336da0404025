//! OCFL object handle: read projections over committed versions and the entry point
//! for transactional updates.

use std::cell::RefCell;
use std::collections::HashMap;
use std::convert::TryInto;
use std::io::Read;
use std::rc::Rc;
use std::str;
use std::sync::Arc;

use log::{error, info};

use crate::consts::*;
use crate::digest::{DigestAlgorithm, HasherPool, HexDigest};
use crate::error::{OcflError, Result};
use crate::inventory::Inventory;
use crate::paths;
use crate::store::Store;
use crate::transaction::Transaction;
use crate::types::{
    CommitOptions, FileRef, InventoryPath, SpecVersion, UpdateMode, VersionNum,
};

/// Configuration applied when an object is first written. Loading an existing object
/// ignores everything except the fixity algorithms.
#[derive(Debug, Clone)]
pub struct ObjectConfig {
    /// The inventory digest algorithm; must be sha256 or sha512
    pub digest_algorithm: DigestAlgorithm,
    /// The name of version content directories
    pub content_directory: String,
    /// Zero-padding width for version numbers; 0 for unpadded
    pub zero_padding_width: u32,
    /// Additional algorithms recorded in the fixity block for new content
    pub fixity_algorithms: Vec<DigestAlgorithm>,
    pub spec_version: SpecVersion,
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            digest_algorithm: DigestAlgorithm::Sha512,
            content_directory: DEFAULT_CONTENT_DIR.to_string(),
            zero_padding_width: 0,
            fixity_algorithms: Vec::new(),
            spec_version: SpecVersion::default(),
        }
    }
}

/// Selects a file within an object for reading
#[derive(Debug)]
pub enum FileSelector<'a> {
    /// A logical path, optionally pinned to a version. `None` reads from HEAD.
    Logical {
        path: &'a str,
        version: Option<VersionNum>,
    },
    /// Any file with the digest
    Digest(&'a HexDigest),
    /// A manifest content path, relative the object root
    Content(&'a str),
}

/// A handle on an OCFL object within a store. The object does not need to exist until
/// its first update is committed.
pub struct OcflObject {
    store: Arc<dyn Store>,
    object_id: String,
    object_root: String,
    workspace_root: String,
    config: ObjectConfig,
    pool: HasherPool,
    inventories: RefCell<HashMap<Option<VersionNum>, Rc<Inventory>>>,
}

impl std::fmt::Debug for OcflObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcflObject")
            .field("object_id", &self.object_id)
            .field("object_root", &self.object_root)
            .field("workspace_root", &self.workspace_root)
            .field("config", &self.config)
            .finish()
    }
}

impl OcflObject {
    /// Creates a handle on the object rooted at `object_root`, a `/` separated path
    /// relative the store root. When no workspace is given, updates are staged in a
    /// sibling directory next to the object root.
    pub fn new(
        store: Arc<dyn Store>,
        object_id: &str,
        object_root: &str,
        workspace: Option<&str>,
        config: ObjectConfig,
    ) -> Result<Self> {
        if !config.digest_algorithm.is_content() {
            return Err(OcflError::UnsupportedAlgorithm(format!(
                "{} cannot be used as an inventory digest algorithm; must be sha256 or sha512",
                config.digest_algorithm
            )));
        }
        if config.content_directory.is_empty() || config.content_directory.contains('/') {
            return Err(OcflError::IllegalArgument(format!(
                "Invalid content directory name: {}",
                config.content_directory
            )));
        }
        if object_id.is_empty() {
            return Err(OcflError::IllegalArgument(
                "Object ids may not be empty".to_string(),
            ));
        }

        let object_root = object_root.trim_matches('/').to_string();
        let workspace_root = match workspace {
            Some(workspace) => workspace.trim_matches('/').to_string(),
            None => format!("{}__work", object_root),
        };

        Ok(Self {
            store,
            object_id: object_id.to_string(),
            object_root,
            workspace_root,
            config,
            pool: HasherPool::new(),
            inventories: RefCell::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.object_id
    }

    /// The object's root directory, relative the store root
    pub fn object_root(&self) -> &str {
        &self.object_root
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn config(&self) -> &ObjectConfig {
        &self.config
    }

    pub(crate) fn workspace_root(&self) -> &str {
        &self.workspace_root
    }

    pub(crate) fn pool(&self) -> &HasherPool {
        &self.pool
    }

    /// True if the object has at least one committed version
    pub fn exists(&self) -> Result<bool> {
        Ok(self.inventory(None)?.is_some())
    }

    /// Loads the object's inventory. `None` loads the root inventory; a version number
    /// loads the copy that was written with that version. Returns `Ok(None)` when the
    /// inventory file does not exist. The raw bytes are verified against the sidecar
    /// before parsing, and inventories are cached per handle.
    pub fn inventory(&self, version: Option<VersionNum>) -> Result<Option<Rc<Inventory>>> {
        if let Some(cached) = self.inventories.borrow().get(&version) {
            return Ok(Some(cached.clone()));
        }

        let dir = match version {
            Some(version) => paths::version_path(&self.object_root, version),
            None => self.object_root.clone(),
        };

        let bytes = match self.store.read(&paths::inventory_path(&dir)) {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut inventory: Inventory = serde_json::from_slice(&bytes)?;

        let sidecar_path = paths::sidecar_path(&dir, inventory.digest_algorithm);
        let recorded = match self.store.read(&sidecar_path) {
            Ok(sidecar) => parse_sidecar(&sidecar, &sidecar_path, &inventory.id)?,
            Err(e) if e.is_not_found() => {
                return Err(OcflError::InventoryCorrupted {
                    object_id: inventory.id,
                    message: format!("Inventory sidecar {} is missing", sidecar_path),
                })
            }
            Err(e) => return Err(e),
        };

        let actual = inventory.digest_algorithm.hash_bytes(&bytes);
        if recorded != actual {
            return Err(OcflError::InventoryCorrupted {
                object_id: inventory.id,
                message: format!(
                    "Inventory digest does not match its sidecar: expected {}; found {}",
                    recorded, actual
                ),
            });
        }

        if inventory.id != self.object_id {
            return Err(OcflError::InventoryCorrupted {
                object_id: self.object_id.clone(),
                message: format!("Inventory contains unexpected object id {}", inventory.id),
            });
        }

        inventory.object_root = self.object_root.clone();
        inventory.validate()?;

        let inventory = Rc::new(inventory);
        self.inventories
            .borrow_mut()
            .insert(version, inventory.clone());

        Ok(Some(inventory))
    }

    pub(crate) fn head_inventory(&self) -> Result<Rc<Inventory>> {
        self.inventory(None)?.ok_or_else(|| {
            OcflError::NotFound(format!("Object {} does not exist", self.object_id))
        })
    }

    /// Lists the files in a version. `None` lists the HEAD version.
    pub fn files(&self, version: Option<VersionNum>) -> Result<Vec<FileRef>> {
        self.head_inventory()?.files(version)
    }

    /// The number of files in a version
    pub fn count(&self, version: Option<VersionNum>) -> Result<usize> {
        let inventory = self.head_inventory()?;
        let version = version.unwrap_or(inventory.head);
        Ok(inventory.get_version(version)?.state_len())
    }

    /// Reads an entire file into memory
    pub fn read(&self, selector: FileSelector) -> Result<Vec<u8>> {
        let path = self.resolve_content_path(selector)?;
        self.store.read(&path)
    }

    /// Opens a file for streaming reads
    pub fn open_read(&self, selector: FileSelector) -> Result<Box<dyn Read + Send>> {
        let path = self.resolve_content_path(selector)?;
        self.store.open_read(&path)
    }

    /// Updates the object, merging changes onto the previous version's state. The
    /// transaction commits when the updater returns `Ok`, and rolls back otherwise.
    /// Returns the committed version, or `None` when the update changed nothing.
    pub fn update<F>(&self, updater: F) -> Result<Option<VersionNum>>
    where
        F: FnOnce(&mut Transaction) -> Result<()>,
    {
        self.update_with(UpdateMode::Merge, CommitOptions::default(), updater)
    }

    /// Same as `update()`, with an explicit update mode and commit options
    pub fn update_with<F>(
        &self,
        mode: UpdateMode,
        options: CommitOptions,
        updater: F,
    ) -> Result<Option<VersionNum>>
    where
        F: FnOnce(&mut Transaction) -> Result<()>,
    {
        let mut transaction = self.begin_update(mode)?;

        match updater(&mut transaction) {
            Ok(()) => transaction.commit(options),
            Err(e) => {
                if let Err(rollback_err) = transaction.rollback() {
                    error!(
                        "Failed to roll back update to object {}: {}",
                        self.object_id, rollback_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Opens a transaction on the object for manual control. The caller must commit or
    /// roll back the returned transaction.
    pub fn begin_update(&self, mode: UpdateMode) -> Result<Transaction> {
        Transaction::new(self, mode)
    }

    fn resolve_content_path(&self, selector: FileSelector) -> Result<String> {
        let inventory = self.head_inventory()?;

        let content_path = match selector {
            FileSelector::Logical { path, version } => {
                let logical: InventoryPath = path.try_into()?;
                match inventory.content_path_for_logical_path(&logical, version) {
                    Ok(content_path) => content_path.clone(),
                    Err(e) if e.is_not_found() => {
                        return Err(OcflError::ContentNotFound {
                            object_id: self.object_id.clone(),
                            path: path.to_string(),
                        })
                    }
                    Err(e) => return Err(e),
                }
            }
            FileSelector::Digest(digest) => {
                if !inventory.contains_digest(digest) {
                    return Err(OcflError::ContentNotFound {
                        object_id: self.object_id.clone(),
                        path: digest.to_string(),
                    });
                }
                inventory.content_path_for_digest(digest, None, None)?.clone()
            }
            FileSelector::Content(path) => {
                let content_path: InventoryPath = path.try_into()?;
                if !inventory.contains_content_path(&content_path) {
                    return Err(OcflError::ContentNotFound {
                        object_id: self.object_id.clone(),
                        path: path.to_string(),
                    });
                }
                Rc::new(content_path)
            }
        };

        Ok(paths::join(&self.object_root, content_path.as_str()))
    }

    /// Validates the object's namaste declaration, creating it when the object is new.
    /// Fails when the object root is occupied by something that is not this object, or
    /// when the object would be created inside another object.
    pub(crate) fn ensure_namaste(&self) -> Result<()> {
        let namaste = self.config.spec_version.object_namaste();
        let namaste_path = paths::join(&self.object_root, &namaste.filename);

        if self.store.exists(&namaste_path)? {
            let content = self.store.read(&namaste_path)?;
            if content != namaste.content.as_bytes() {
                return Err(OcflError::IllegalState(format!(
                    "Object declaration {} does not contain the expected content",
                    namaste_path
                )));
            }
            return Ok(());
        }

        // The object may have been created under a different OCFL version
        for version in SpecVersion::all() {
            let declaration = paths::join(&self.object_root, &version.object_namaste().filename);
            if self.store.exists(&declaration)? {
                return Ok(());
            }
        }

        match self.store.read_dir(&self.object_root) {
            Ok(children) if !children.is_empty() => {
                return Err(OcflError::NonEmptyDirectory(self.object_root.clone()));
            }
            Ok(_) => (),
            Err(e) if e.is_not_found() => (),
            Err(e) => return Err(e),
        }

        self.check_not_nested()?;

        self.store.mkdir(&self.object_root)?;
        self.store
            .write(&namaste_path, namaste.content.as_bytes())?;

        info!(
            "Created OCFL object {} at {}",
            self.object_id, self.object_root
        );

        Ok(())
    }

    /// Walks the ancestors of the object root looking for object declarations
    fn check_not_nested(&self) -> Result<()> {
        let mut ancestor = paths::parent(&self.object_root);

        loop {
            for version in SpecVersion::all() {
                let declaration = paths::join(ancestor, &version.object_namaste().filename);
                if self.store.exists(&declaration)? {
                    return Err(OcflError::NestedObjectNotAllowed {
                        object_id: self.object_id.clone(),
                        path: ancestor.to_string(),
                    });
                }
            }

            if ancestor.is_empty() {
                return Ok(());
            }
            ancestor = paths::parent(ancestor);
        }
    }

    pub(crate) fn invalidate_cache(&self) {
        self.inventories.borrow_mut().clear();
    }
}

/// Extracts the digest from sidecar file content: `<digest> inventory.json`
fn parse_sidecar(bytes: &[u8], sidecar_path: &str, object_id: &str) -> Result<HexDigest> {
    let content = str::from_utf8(bytes).map_err(|_| OcflError::InventoryCorrupted {
        object_id: object_id.to_string(),
        message: format!("Inventory sidecar {} is not valid UTF-8", sidecar_path),
    })?;

    match content.split_whitespace().next() {
        Some(digest) => Ok(digest.into()),
        None => Err(OcflError::InventoryCorrupted {
            object_id: object_id.to_string(),
            message: format!("Inventory sidecar {} is empty", sidecar_path),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_sidecar;
    use crate::digest::HexDigest;

    #[test]
    fn parse_sidecar_tolerates_whitespace() {
        let digest: HexDigest = "ABC123".into();

        assert_eq!(
            digest,
            parse_sidecar(b"abc123 inventory.json\n", "inventory.json.sha512", "id").unwrap()
        );
        assert_eq!(
            digest,
            parse_sidecar(b"abc123\tinventory.json", "inventory.json.sha512", "id").unwrap()
        );
    }

    #[test]
    fn parse_sidecar_rejects_empty() {
        assert!(parse_sidecar(b"  \n", "inventory.json.sha512", "id").is_err());
    }
}
