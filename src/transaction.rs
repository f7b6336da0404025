//! Transactional write protocol. A transaction stages a new version in the object's
//! workspace and moves it into the object root only when every step of the commit
//! succeeds; failures roll the workspace back and leave the committed object untouched.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::convert::TryInto;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::rc::Rc;

use log::{info, warn};
use walkdir::WalkDir;

use crate::consts::*;
use crate::digest::{DigestAlgorithm, Digester, HexDigest};
use crate::error::{MultiError, OcflError, Result};
use crate::inventory::Inventory;
use crate::object::OcflObject;
use crate::paths;
use crate::types::{CommitOptions, InventoryPath, UpdateMode, VersionNum};
use crate::util::parallelize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

/// An open update on an OCFL object. All mutations apply to a draft inventory and
/// staged files in the workspace; nothing is visible to readers until `commit()`.
pub struct Transaction<'a> {
    object: &'a OcflObject,
    inventory: Inventory,
    version_num: VersionNum,
    /// Workspace directory the new version is staged in
    version_path: String,
    /// The first workspace directory this transaction created, removed on rollback
    created_workspace: Option<String>,
    state: TransactionState,
    open_writers: Rc<Cell<usize>>,
    purged: bool,
    /// Content paths in committed versions that a purge scheduled for deletion
    deferred_deletions: Vec<InventoryPath>,
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("object_id", &self.inventory.id)
            .field("version_num", &self.version_num)
            .field("version_path", &self.version_path)
            .field("state", &self.state)
            .finish()
    }
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(object: &'a OcflObject, mode: UpdateMode) -> Result<Self> {
        let inventory = match object.inventory(None)? {
            Some(existing) => {
                existing.next_version(matches!(mode, UpdateMode::Replace))?
            }
            None => {
                let config = object.config();
                Inventory::builder(object.id())
                    .with_spec_version(config.spec_version)
                    .with_digest_algorithm(config.digest_algorithm)
                    .with_head(VersionNum::with_width(1, config.zero_padding_width))
                    .with_content_directory(&config.content_directory)
                    .with_object_root(object.object_root())
                    .build()?
            }
        };

        let version_num = inventory.head;
        let version_path = paths::version_path(object.workspace_root(), version_num);

        if object.store().exists(&version_path)? {
            return Err(OcflError::UncommittedChanges(version_path));
        }

        let created_workspace = object.store().mkdir(&version_path)?;

        Ok(Self {
            object,
            inventory,
            version_num,
            version_path,
            created_workspace,
            state: TransactionState::Open,
            open_writers: Rc::new(Cell::new(0)),
            purged: false,
            deferred_deletions: Vec::new(),
        })
    }

    /// The version this transaction will commit
    pub fn version(&self) -> VersionNum {
        self.version_num
    }

    /// The draft inventory, reflecting all mutations applied so far
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Writes the bytes to a logical path. Content the object has already seen is not
    /// written again; the new logical path maps to the existing copy.
    pub fn write(&mut self, logical_path: &str, bytes: &[u8]) -> Result<()> {
        self.check_open()?;
        let logical: InventoryPath = logical_path.try_into()?;
        let digest = self.inventory.digest_algorithm.hash_bytes(bytes);

        if self.inventory.contains_digest(&digest) {
            self.inventory.add_file(digest, logical, None, None)?;
        } else {
            let mut fixity = HashMap::new();
            for algorithm in &self.object.config().fixity_algorithms {
                fixity.insert(*algorithm, algorithm.hash_bytes(bytes));
            }

            let content_path = self.inventory.new_content_path_head(&logical)?;
            self.object
                .store()
                .write(&self.staged_path(&content_path), bytes)?;
            self.inventory
                .add_file(digest, logical, Some(content_path), Some(&fixity))?;
        }

        Ok(())
    }

    /// Streams a reader to a logical path, hashing while writing. When the content turns
    /// out to already exist in the object, the staged copy is discarded.
    pub fn write_from(&mut self, logical_path: &str, reader: &mut dyn Read) -> Result<()> {
        self.check_open()?;
        let logical: InventoryPath = logical_path.try_into()?;
        let content_path = self.inventory.new_content_path_head(&logical)?;
        let staged = self.staged_path(&content_path);
        let algorithms = self.all_algorithms();

        let inner = self.object.store().open_write(&staged)?;
        let mut writer = self.object.pool().multi_writer(&algorithms, inner);
        io::copy(reader, &mut writer)?;
        writer.flush()?;
        let mut digests = writer.finalize_hex();

        let digest = digests
            .remove(&self.inventory.digest_algorithm)
            .ok_or_else(|| {
                OcflError::General("Primary digest missing from multi-digest results".to_string())
            })?;

        if self.inventory.contains_digest(&digest) {
            self.object.store().remove(&staged)?;
            self.inventory.add_file(digest, logical, None, None)?;
        } else {
            self.inventory
                .add_file(digest, logical, Some(content_path), Some(&digests))?;
        }

        Ok(())
    }

    /// Opens a streaming writer on a logical path. The returned writer must be passed
    /// back to `ContentWriter::finalize()`; a writer that is dropped without being
    /// finalized causes the eventual commit to fail and roll back.
    pub fn writer(&mut self, logical_path: &str) -> Result<ContentWriter> {
        self.check_open()?;
        let logical: InventoryPath = logical_path.try_into()?;
        let content_path = self.inventory.new_content_path_head(&logical)?;
        let staged = self.staged_path(&content_path);

        let inner = self.object.store().open_write(&staged)?;
        let digests = self
            .all_algorithms()
            .into_iter()
            .map(|algorithm| (algorithm, algorithm.digester()))
            .collect();

        self.open_writers.set(self.open_writers.get() + 1);

        Ok(ContentWriter {
            logical_path: logical,
            content_path,
            staged_path: staged,
            inner,
            digests,
            open_writers: self.open_writers.clone(),
            finalized: false,
        })
    }

    /// Imports a single file from the local filesystem
    pub fn import_file(&mut self, logical_path: &str, source: impl AsRef<Path>) -> Result<()> {
        self.check_open()?;
        let mut file = File::open(source.as_ref())?;
        self.write_from(logical_path, &mut file)
    }

    /// Imports a directory tree from the local filesystem under a logical directory.
    /// Files are digested and copied with a bounded worker pool. Individual failures do
    /// not abort the rest of the import; they are aggregated into a single error after
    /// every file has been attempted.
    pub fn import_dir(&mut self, logical_dir: &str, source: impl AsRef<Path>) -> Result<()> {
        self.check_open()?;
        let source = source.as_ref();
        let logical_dir = logical_dir.trim_matches('/');

        let mut items = Vec::new();
        for entry in WalkDir::new(source) {
            let entry = entry.map_err(|e| OcflError::General(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = relative_logical(entry.path(), source)?;
            let logical: InventoryPath = paths::join(logical_dir, &relative).as_str().try_into()?;
            items.push((logical, entry.into_path()));
        }
        items.sort_by(|a, b| a.0.cmp(&b.0));

        let total = items.len();
        let primary = self.inventory.digest_algorithm;
        let algorithms = self.all_algorithms();
        let pool = self.object.pool();

        let digested = parallelize(items, DEFAULT_PARALLELISM, |(logical, path)| {
            let result: Result<HashMap<DigestAlgorithm, HexDigest>> = (|| {
                let mut file = File::open(&path)?;
                let mut writer = pool.multi_writer(&algorithms, io::sink());
                io::copy(&mut file, &mut writer)?;
                Ok(writer.finalize_hex())
            })();
            (logical, path, result)
        });

        let mut failures: Vec<String> = Vec::new();
        let mut copy_jobs = Vec::new();
        let mut adds = Vec::new();
        let mut staged_digests: HashSet<HexDigest> = HashSet::new();

        for (logical, path, result) in digested {
            let mut digests = match result {
                Ok(digests) => digests,
                Err(e) => {
                    failures.push(format!("Failed to import {}: {}", path.display(), e));
                    continue;
                }
            };

            let digest = match digests.remove(&primary) {
                Some(digest) => digest,
                None => {
                    failures.push(format!(
                        "Failed to import {}: primary digest was not computed",
                        path.display()
                    ));
                    continue;
                }
            };

            let novel = !self.inventory.contains_digest(&digest)
                && !staged_digests.contains(&digest);

            if novel {
                staged_digests.insert(digest.clone());
                let content_path = self.inventory.new_content_path_head(&logical)?;
                copy_jobs.push((path, self.staged_path(&content_path), digest.clone()));
                adds.push((logical, digest, Some((content_path, digests))));
            } else {
                adds.push((logical, digest, None));
            }
        }

        let store = self.object.store();
        let copy_results = parallelize(copy_jobs, DEFAULT_PARALLELISM, |(path, staged, digest)| {
            (|| -> Result<()> {
                let mut file = File::open(&path)?;
                let mut writer = store.open_write(&staged)?;
                io::copy(&mut file, &mut writer)?;
                writer.flush()?;
                Ok(())
            })()
            .map_err(|e| (digest, format!("Failed to import {}: {}", path.display(), e)))
        });

        let mut failed_digests: HashSet<HexDigest> = HashSet::new();
        for result in copy_results {
            if let Err((digest, message)) = result {
                failed_digests.insert(digest);
                failures.push(message);
            }
        }

        for (logical, digest, novel) in adds {
            if failed_digests.contains(&digest) {
                continue;
            }
            match novel {
                Some((content_path, fixity)) => {
                    self.inventory
                        .add_file(digest, logical, Some(content_path), Some(&fixity))?
                }
                None => self.inventory.add_file(digest, logical, None, None)?,
            };
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(OcflError::Multi(MultiError::new(total, failures)))
        }
    }

    /// Copies a logical path, or directory, to a new location within the new version.
    /// The source may be read out of an earlier version; `None` copies from the draft
    /// state. Returns the number of files copied.
    pub fn copy_files(
        &mut self,
        src_version: Option<VersionNum>,
        src: &str,
        dst: &str,
    ) -> Result<usize> {
        self.check_open()?;
        let src: InventoryPath = src.try_into()?;
        let dst: InventoryPath = dst.try_into()?;
        let version = src_version.unwrap_or(self.version_num);
        self.inventory.copy_files(version, &src, &dst)
    }

    /// Moves a logical path, or directory, to a new location within the new version.
    /// Content that was staged by this transaction is relocated to match.
    pub fn move_files(&mut self, src: &str, dst: &str) -> Result<()> {
        self.check_open()?;
        let src: InventoryPath = src.try_into()?;
        let dst: InventoryPath = dst.try_into()?;

        let moved = self.inventory.move_files(&src, &dst)?;

        for (_, to, digest) in moved {
            if let Some(old_content) = self.inventory.staged_content_path(&digest) {
                let new_content = self.inventory.new_content_path_head(&to)?;
                self.object.store().rename(
                    &self.staged_path(&old_content),
                    &self.staged_path(&new_content),
                )?;
                self.inventory.rename_content_path(&old_content, new_content);
            }
        }

        Ok(())
    }

    /// Removes a logical path, or directory, from the new version. Content staged by
    /// this transaction that is no longer referenced is deleted from the workspace.
    /// Returns the number of files removed.
    pub fn remove_files(&mut self, logical_path: &str) -> Result<usize> {
        self.check_open()?;
        let logical: InventoryPath = logical_path.try_into()?;

        let removed = self.inventory.remove_files(&logical);
        let count = removed.len();

        for (_, content) in removed {
            if let Some(content_path) = content {
                self.object.store().remove(&self.staged_path(&content_path))?;
            }
        }

        Ok(count)
    }

    /// Restores a logical path, or directory, as it existed in an earlier version.
    /// Returns the number of files reinstated.
    pub fn reinstate(&mut self, version: VersionNum, logical_path: &str) -> Result<usize> {
        self.check_open()?;
        let logical: InventoryPath = logical_path.try_into()?;
        self.inventory.reinstate_files(version, &logical)
    }

    /// Removes a logical path, or directory, from the state of every version, scheduling
    /// unreferenced content files for deletion at commit time. This rewrites history, so
    /// committing afterwards requires `force`. Returns the number of content files that
    /// will be deleted.
    pub fn purge(&mut self, logical_path: &str) -> Result<usize> {
        self.check_open()?;
        let logical: InventoryPath = logical_path.try_into()?;

        let states_before: usize = self
            .inventory
            .versions
            .values()
            .map(|version| version.state_len())
            .sum();

        let removed = self.inventory.purge_files(&logical);
        let count = removed.len();

        let states_after: usize = self
            .inventory
            .versions
            .values()
            .map(|version| version.state_len())
            .sum();
        self.purged = self.purged || states_after != states_before;

        let staged_prefix = format!("{}/", self.version_num);
        for content_path in removed {
            if content_path.as_str().starts_with(&staged_prefix) {
                self.object.store().remove(&self.staged_path(&content_path))?;
            } else {
                self.deferred_deletions.push(content_path);
            }
        }

        Ok(count)
    }

    /// Commits the staged version. Returns the committed version number, or `None` when
    /// the update changed nothing and was silently discarded. A transaction that has
    /// already committed returns `Ok(None)`; one that has rolled back fails.
    pub fn commit(&mut self, options: CommitOptions) -> Result<Option<VersionNum>> {
        match self.state {
            TransactionState::Committed => return Ok(None),
            TransactionState::RolledBack => return Err(self.terminated_error()),
            TransactionState::Open => (),
        }

        let unfinished = self.open_writers.get();
        if unfinished > 0 {
            let error = OcflError::UnfinishedOperations {
                object_id: self.inventory.id.clone(),
                count: unfinished,
            };
            self.force_rollback();
            return Err(error);
        }

        if self.purged && !options.force {
            return Err(OcflError::IllegalState(format!(
                "Committing purged content in object {} requires force",
                self.inventory.id
            )));
        }

        if !self.inventory.is_head_changed() && !self.purged && !options.force {
            self.rollback()?;
            return Ok(None);
        }

        match self.do_commit(&options) {
            Ok(()) => {
                self.state = TransactionState::Committed;
                self.object.invalidate_cache();
                info!(
                    "Committed version {} of object {}",
                    self.version_num, self.inventory.id
                );
                Ok(Some(self.version_num))
            }
            Err(e) => {
                self.force_rollback();
                Err(e)
            }
        }
    }

    /// Discards the staged version and removes everything this transaction wrote to the
    /// workspace. Rolling back twice is a no-op; rolling back a committed transaction
    /// fails.
    pub fn rollback(&mut self) -> Result<()> {
        match self.state {
            TransactionState::RolledBack => Ok(()),
            TransactionState::Committed => Err(self.terminated_error()),
            TransactionState::Open => {
                let store = self.object.store();
                store.remove(&self.version_path)?;
                if let Some(created) = &self.created_workspace {
                    store.remove(created)?;
                }
                self.state = TransactionState::RolledBack;
                Ok(())
            }
        }
    }

    fn do_commit(&mut self, options: &CommitOptions) -> Result<()> {
        self.inventory.head_version_mut().update_meta(&options.meta);

        let bytes = serde_json::to_vec_pretty(&self.inventory)?;
        let digest = self.inventory.digest_algorithm.hash_bytes(&bytes);
        let sidecar = format!("{} {}\n", digest, INVENTORY_FILE);
        let sidecar_name = paths::sidecar_name(self.inventory.digest_algorithm);

        let store = self.object.store();
        store.write(&paths::inventory_path(&self.version_path), &bytes)?;
        store.write(
            &paths::join(&self.version_path, &sidecar_name),
            sidecar.as_bytes(),
        )?;

        self.object.ensure_namaste()?;

        let object_root = self.object.object_root();
        let final_version_path = paths::version_path(object_root, self.version_num);

        if store.exists(&final_version_path)? {
            return Err(OcflError::IllegalState(format!(
                "Version {} of object {} already exists",
                self.version_num, self.inventory.id
            )));
        }

        store.rename(&self.version_path, &final_version_path)?;

        // Swap the root inventory through a temp file so a reader never sees a torn copy.
        // Until the swap lands, the previous version is still the authoritative head, so
        // a failed swap must unpublish the version directory that was just renamed in.
        let root_inventory = paths::inventory_path(object_root);
        let tmp = format!("{}{}", root_inventory, INVENTORY_TMP_SUFFIX);
        let swap = store
            .write(&tmp, &bytes)
            .and_then(|()| store.rename(&tmp, &root_inventory));

        if let Err(e) = swap {
            if let Err(cleanup) = store
                .remove(&tmp)
                .and_then(|()| store.remove(&final_version_path))
            {
                warn!(
                    "Failed to remove {} after a failed commit of object {}: {}",
                    final_version_path, self.inventory.id, cleanup
                );
            }
            return Err(e);
        }

        store.copy(
            &paths::join(&final_version_path, &sidecar_name),
            &paths::join(object_root, &sidecar_name),
        )?;

        for content_path in &self.deferred_deletions {
            store.remove(&paths::join(object_root, content_path.as_str()))?;
        }

        if let Some(created) = &self.created_workspace {
            store.remove(created)?;
        }

        Ok(())
    }

    /// Rollback that must not mask the error that triggered it
    fn force_rollback(&mut self) {
        if let Err(e) = self.rollback() {
            warn!(
                "Failed to roll back transaction on object {}: {}",
                self.inventory.id, e
            );
        }
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            TransactionState::Open => Ok(()),
            _ => Err(self.terminated_error()),
        }
    }

    fn terminated_error(&self) -> OcflError {
        let state = match self.state {
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
            TransactionState::Open => "open",
        };
        OcflError::TransactionAlreadyCommitted {
            object_id: self.inventory.id.clone(),
            state: state.to_string(),
        }
    }

    fn staged_path(&self, content_path: &InventoryPath) -> String {
        paths::join(self.object.workspace_root(), content_path.as_str())
    }

    fn all_algorithms(&self) -> Vec<DigestAlgorithm> {
        let mut algorithms = vec![self.inventory.digest_algorithm];
        for algorithm in &self.object.config().fixity_algorithms {
            if !algorithms.contains(algorithm) {
                algorithms.push(*algorithm);
            }
        }
        algorithms
    }
}

/// A streaming writer on a staged logical path. Writes are hashed as they pass through.
/// The writer records nothing in the transaction until it is finalized.
pub struct ContentWriter {
    logical_path: InventoryPath,
    content_path: InventoryPath,
    staged_path: String,
    inner: Box<dyn Write + Send>,
    digests: Vec<(DigestAlgorithm, Box<dyn Digester>)>,
    open_writers: Rc<Cell<usize>>,
    finalized: bool,
}

impl ContentWriter {
    /// Completes the write and records the file in the transaction the writer came from.
    /// When the streamed content already exists in the object, the staged copy is
    /// discarded and the logical path maps to the existing content.
    pub fn finalize(mut self, transaction: &mut Transaction<'_>) -> Result<()> {
        self.inner.flush()?;
        self.finalized = true;
        self.open_writers.set(self.open_writers.get() - 1);

        transaction.check_open()?;

        let primary = transaction.inventory.digest_algorithm;
        let mut digest = None;
        let mut fixity = HashMap::new();

        for (algorithm, mut digester) in self.digests.drain(..) {
            let hex = digester.finalize_reset();
            if algorithm == primary {
                digest = Some(hex);
            } else {
                fixity.insert(algorithm, hex);
            }
        }

        let digest = digest.ok_or_else(|| {
            OcflError::General("Primary digest missing from content writer".to_string())
        })?;

        let logical = self.logical_path.clone();

        if transaction.inventory.contains_digest(&digest) {
            transaction.object.store().remove(&self.staged_path)?;
            transaction.inventory.add_file(digest, logical, None, None)?;
        } else {
            let content_path = self.content_path.clone();
            transaction
                .inventory
                .add_file(digest, logical, Some(content_path), Some(&fixity))?;
        }

        Ok(())
    }
}

impl Write for ContentWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        for (_, digester) in self.digests.iter_mut() {
            digester.update(&buf[..written]);
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Drop for ContentWriter {
    fn drop(&mut self) {
        if !self.finalized {
            warn!(
                "Content writer for {} was dropped without being finalized",
                self.logical_path
            );
        }
    }
}

/// Converts the part of `path` under `base` into a `/` separated logical path
fn relative_logical(path: &Path, base: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(base)
        .map_err(|e| OcflError::General(e.to_string()))?;

    let mut result = String::new();

    for component in relative.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| {
            OcflError::General(format!("Path {} is not valid UTF-8", path.to_string_lossy()))
        })?;
        result = paths::join(&result, part);
    }

    Ok(result)
}
