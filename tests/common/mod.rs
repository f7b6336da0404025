#![allow(dead_code)]

use std::convert::TryFrom;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use assert_fs::prelude::*;
use assert_fs::TempDir;
use ocflkit::layout::{LayoutExtensionName, StorageLayout};
use ocflkit::store::fs::FsStore;
use ocflkit::store::{FileInfo, Store};
use ocflkit::{
    CommitMeta, CommitOptions, InventoryPath, OcflError, OcflStorage, Result, SpecVersion,
};

pub fn fs_store(temp: &TempDir) -> Arc<FsStore> {
    Arc::new(FsStore::new(temp.path()).unwrap())
}

/// Creates a new storage root using the flat-direct layout
pub fn flat_storage(store: Arc<dyn Store>) -> OcflStorage {
    let layout = StorageLayout::new(LayoutExtensionName::FlatDirectLayout, None).unwrap();
    OcflStorage::create(store, layout, SpecVersion::default()).unwrap()
}

/// Creates a new storage root using the hashed n-tuple layout
pub fn hashed_storage(store: Arc<dyn Store>) -> OcflStorage {
    let layout = StorageLayout::new(LayoutExtensionName::HashedNTupleLayout, None).unwrap();
    OcflStorage::create(store, layout, SpecVersion::default()).unwrap()
}

pub fn commit_msg(message: &str) -> CommitOptions {
    CommitOptions {
        meta: CommitMeta {
            user_name: Some("Test".to_string()),
            user_address: Some("mailto:test@example.com".to_string()),
            message: Some(message.to_string()),
            created: None,
        },
        force: false,
    }
}

pub fn path(path: &str) -> InventoryPath {
    InventoryPath::try_from(path).unwrap()
}

pub fn create_file(temp: &TempDir, path: &str, content: &str) {
    let mut child: Option<assert_fs::fixture::ChildPath> = None;
    for part in path.split('/') {
        child = match child {
            Some(child) => Some(child.child(part)),
            None => Some(temp.child(part)),
        };
    }
    child.unwrap().write_str(content).unwrap();
}

/// Store decorator that records every path written, so tests can prove content
/// deduplication by counting physical content writes.
pub struct CountingStore {
    inner: FsStore,
    writes: Mutex<Vec<String>>,
}

impl CountingStore {
    pub fn new(root: &Path) -> Result<Self> {
        Ok(Self {
            inner: FsStore::new(root)?,
            writes: Mutex::new(Vec::new()),
        })
    }

    /// The number of writes that landed under a version content directory
    pub fn content_writes(&self) -> usize {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|path| path.contains("/content/"))
            .count()
    }

    fn record(&self, path: &str) {
        self.writes.lock().unwrap().push(path.to_string());
    }
}

/// Store decorator that fails writes to a configured path, so tests can exercise
/// commit failure handling.
pub struct FailingStore {
    inner: FsStore,
    fail_on_write: Mutex<Option<String>>,
}

impl FailingStore {
    pub fn new(root: &Path) -> Result<Self> {
        Ok(Self {
            inner: FsStore::new(root)?,
            fail_on_write: Mutex::new(None),
        })
    }

    /// Makes every write to the path fail until cleared
    pub fn fail_on_write(&self, path: &str) {
        *self.fail_on_write.lock().unwrap() = Some(path.to_string());
    }

    pub fn clear(&self) {
        *self.fail_on_write.lock().unwrap() = None;
    }

    fn check(&self, path: &str) -> Result<()> {
        if self.fail_on_write.lock().unwrap().as_deref() == Some(path) {
            return Err(OcflError::General(format!(
                "Injected write failure: {}",
                path
            )));
        }
        Ok(())
    }
}

impl Store for FailingStore {
    fn stat(&self, path: &str) -> Result<FileInfo> {
        self.inner.stat(path)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.read(path)
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        self.inner.open_read(path)
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.check(path)?;
        self.inner.write(path, bytes)
    }

    fn open_write(&self, path: &str) -> Result<Box<dyn Write + Send>> {
        self.check(path)?;
        self.inner.open_write(path)
    }

    fn copy(&self, src: &str, dst: &str) -> Result<()> {
        self.inner.copy(src, dst)
    }

    fn rename(&self, src: &str, dst: &str) -> Result<()> {
        self.inner.rename(src, dst)
    }

    fn remove(&self, path: &str) -> Result<()> {
        self.inner.remove(path)
    }

    fn mkdir(&self, path: &str) -> Result<Option<String>> {
        self.inner.mkdir(path)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>> {
        self.inner.read_dir(path)
    }

    fn list(&self, path: &str, recursive: bool) -> Result<Vec<FileInfo>> {
        self.inner.list(path, recursive)
    }
}

impl Store for CountingStore {
    fn stat(&self, path: &str) -> Result<FileInfo> {
        self.inner.stat(path)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.read(path)
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        self.inner.open_read(path)
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.record(path);
        self.inner.write(path, bytes)
    }

    fn open_write(&self, path: &str) -> Result<Box<dyn Write + Send>> {
        self.record(path);
        self.inner.open_write(path)
    }

    fn copy(&self, src: &str, dst: &str) -> Result<()> {
        self.record(dst);
        self.inner.copy(src, dst)
    }

    fn rename(&self, src: &str, dst: &str) -> Result<()> {
        self.inner.rename(src, dst)
    }

    fn remove(&self, path: &str) -> Result<()> {
        self.inner.remove(path)
    }

    fn mkdir(&self, path: &str) -> Result<Option<String>> {
        self.inner.mkdir(path)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>> {
        self.inner.read_dir(path)
    }

    fn list(&self, path: &str, recursive: bool) -> Result<Vec<FileInfo>> {
        self.inner.list(path, recursive)
    }
}
