//! OCFL storage root: creation, loading, and object enumeration.

use std::sync::Arc;

use log::{error, info, warn};
use serde::Deserialize;

use crate::consts::*;
use crate::error::{OcflError, Result};
use crate::layout::StorageLayout;
use crate::object::{ObjectConfig, OcflObject};
use crate::paths;
use crate::store::{OcflLayout, Store};
use crate::types::SpecVersion;

/// A handle on an OCFL storage root. Object ids are mapped to object roots by the
/// storage layout recorded in `ocfl_layout.json`.
pub struct OcflStorage {
    store: Arc<dyn Store>,
    layout: Option<StorageLayout>,
    spec_version: SpecVersion,
    /// Store-relative directory updates are staged in; objects default to staging in a
    /// sibling of their object root when unset
    workspace: Option<String>,
}

impl std::fmt::Debug for OcflStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcflStorage")
            .field("layout", &self.layout)
            .field("spec_version", &self.spec_version)
            .field("workspace", &self.workspace)
            .finish()
    }
}

impl OcflStorage {
    /// Initializes a new OCFL storage root at the root of the store. The store root must
    /// be empty. Writes the root declaration, `ocfl_layout.json`, and the layout's
    /// configuration under `extensions/`.
    pub fn create(
        store: Arc<dyn Store>,
        layout: StorageLayout,
        spec_version: SpecVersion,
    ) -> Result<Self> {
        match store.read_dir("") {
            Ok(children) if !children.is_empty() => {
                return Err(OcflError::NonEmptyDirectory("storage root".to_string()));
            }
            Ok(_) => (),
            Err(e) if e.is_not_found() => (),
            Err(e) => return Err(e),
        }

        let namaste = spec_version.root_namaste();
        store.write(&namaste.filename, namaste.content.as_bytes())?;

        let descriptor = OcflLayout::new(layout.extension_name(), layout.description());
        store.write(OCFL_LAYOUT_FILE, &serde_json::to_vec_pretty(&descriptor)?)?;

        let extension_name = layout.extension_name().to_string();
        store.write(
            &paths::layout_config_path("", &extension_name),
            &layout.serialize()?,
        )?;

        info!(
            "Created OCFL {} storage root with layout {}",
            spec_version, extension_name
        );

        Ok(Self {
            store,
            layout: Some(layout),
            spec_version,
            workspace: None,
        })
    }

    /// Loads an existing OCFL storage root. Returns `Ok(None)` when the store root does
    /// not contain an OCFL declaration. A root without an `ocfl_layout.json` loads, but
    /// cannot map object ids.
    pub fn load(store: Arc<dyn Store>) -> Result<Option<Self>> {
        let mut spec_version = None;

        for version in SpecVersion::all() {
            let namaste = version.root_namaste();
            if store.exists(&namaste.filename)? {
                let content = store.read(&namaste.filename)?;
                if content != namaste.content.as_bytes() {
                    return Err(OcflError::IllegalState(format!(
                        "Root declaration {} does not contain the expected content",
                        namaste.filename
                    )));
                }
                spec_version = Some(*version);
                break;
            }
        }

        let spec_version = match spec_version {
            Some(spec_version) => spec_version,
            None => return Ok(None),
        };

        let layout = match store.read(OCFL_LAYOUT_FILE) {
            Ok(bytes) => {
                let descriptor: OcflLayout = serde_json::from_slice(&bytes)?;
                let extension_name = descriptor.extension().to_string();
                let config_path = paths::layout_config_path("", &extension_name);
                let config = match store.read(&config_path) {
                    Ok(config) => Some(config),
                    Err(e) if e.is_not_found() => None,
                    Err(e) => return Err(e),
                };
                Some(StorageLayout::new(
                    descriptor.extension(),
                    config.as_deref(),
                )?)
            }
            Err(e) if e.is_not_found() => {
                warn!("Storage root has no ocfl_layout.json; object ids cannot be mapped");
                None
            }
            Err(e) => return Err(e),
        };

        Ok(Some(Self {
            store,
            layout,
            spec_version,
            workspace: None,
        }))
    }

    /// Sets the directory updates are staged in, relative the store root
    pub fn with_workspace(mut self, workspace: &str) -> Self {
        self.workspace = Some(workspace.trim_matches('/').to_string());
        self
    }

    pub fn spec_version(&self) -> SpecVersion {
        self.spec_version
    }

    pub fn layout(&self) -> Option<&StorageLayout> {
        self.layout.as_ref()
    }

    /// Returns a handle on the object with the id, whether or not it exists yet
    pub fn object(&self, object_id: &str) -> Result<OcflObject> {
        let config = ObjectConfig {
            spec_version: self.spec_version,
            ..ObjectConfig::default()
        };
        self.object_with_config(object_id, config)
    }

    /// Same as `object()` with explicit configuration for new objects
    pub fn object_with_config(&self, object_id: &str, config: ObjectConfig) -> Result<OcflObject> {
        let layout = self.layout.as_ref().ok_or_else(|| {
            OcflError::IllegalState(
                "Cannot map object ids: the storage root has no layout configured".to_string(),
            )
        })?;

        let object_root = layout.map_object_id(object_id)?;
        let workspace = self
            .workspace
            .as_ref()
            .map(|workspace| paths::join(workspace, &object_root));

        OcflObject::new(
            self.store.clone(),
            object_id,
            &object_root,
            workspace.as_deref(),
            config,
        )
    }

    /// Iterates over every object under the storage root. The walk is depth-first, any
    /// directory bearing an object declaration is terminal, and entries that cannot be
    /// read are logged and skipped.
    pub fn objects(&self) -> ObjectIter<'_> {
        ObjectIter {
            storage: self,
            stack: vec![String::new()],
        }
    }
}

/// Lazy iterator over the objects in a storage root
pub struct ObjectIter<'a> {
    storage: &'a OcflStorage,
    stack: Vec<String>,
}

#[derive(Deserialize)]
struct InventoryId {
    id: String,
}

impl<'a> ObjectIter<'a> {
    fn open_object(&self, object_root: &str) -> Result<OcflObject> {
        let bytes = self
            .storage
            .store
            .read(&paths::inventory_path(object_root))?;
        let inventory: InventoryId = serde_json::from_slice(&bytes)?;

        let workspace = self
            .storage
            .workspace
            .as_ref()
            .map(|workspace| paths::join(workspace, object_root));

        OcflObject::new(
            self.storage.store.clone(),
            &inventory.id,
            object_root,
            workspace.as_deref(),
            ObjectConfig {
                spec_version: self.storage.spec_version,
                ..ObjectConfig::default()
            },
        )
    }
}

impl<'a> Iterator for ObjectIter<'a> {
    type Item = OcflObject;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let dir = self.stack.pop()?;

            let children = match self.storage.store.read_dir(&dir) {
                Ok(children) => children,
                Err(e) => {
                    error!("Failed to list {}: {}", dir, e);
                    continue;
                }
            };

            let is_object_root = children.iter().any(|child| {
                !child.is_dir() && child.name().starts_with(NAMASTE_PREFIX)
                    && child.name()[NAMASTE_PREFIX.len()..].starts_with(OBJECT_NAMASTE_BASE)
            });

            if is_object_root {
                match self.open_object(&dir) {
                    Ok(object) => return Some(object),
                    Err(e) => {
                        warn!("Skipping object at {}: {}", dir, e);
                        continue;
                    }
                }
            }

            for child in children {
                if !child.is_dir() {
                    continue;
                }
                if dir.is_empty() && child.name() == EXTENSIONS_DIR {
                    continue;
                }
                self.stack.push(child.path);
            }
        }
    }
}
