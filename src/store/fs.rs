//! Local filesystem store implementation

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::warn;
use walkdir::WalkDir;

use crate::error::{OcflError, Result};
use crate::paths;
use crate::store::{FileInfo, FileKind, Store};

/// `Store` backed by a directory on the local filesystem
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Creates a store rooted at the directory, creating it if it does not exist
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The filesystem path of the store root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        let mut full = self.root.clone();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            full.push(part);
        }
        full
    }

    fn create_parent(&self, path: &str) -> Result<()> {
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn file_info(&self, path: String, metadata: &fs::Metadata) -> FileInfo {
        let kind = match metadata.is_dir() {
            true => FileKind::Directory,
            false => FileKind::File,
        };
        let size = match kind {
            FileKind::File => metadata.len(),
            FileKind::Directory => 0,
        };
        let modified = metadata.modified().ok().map(DateTime::<Local>::from);

        FileInfo {
            path,
            kind,
            size,
            modified,
        }
    }

    /// Copies a directory tree file by file. Used when a rename crosses filesystems.
    fn copy_recursive(&self, src: &str, dst: &str) -> Result<()> {
        let src_root = self.full_path(src);

        for entry in WalkDir::new(&src_root) {
            let entry = entry.map_err(|e| OcflError::General(e.to_string()))?;
            let relative = relative_str(entry.path(), &src_root)?;
            let target = paths::join(dst, &relative);

            if entry.file_type().is_dir() {
                self.mkdir(&target)?;
            } else {
                self.create_parent(&target)?;
                fs::copy(entry.path(), self.full_path(&target))?;
            }
        }

        Ok(())
    }
}

impl Store for FsStore {
    fn stat(&self, path: &str) -> Result<FileInfo> {
        let metadata = fs::metadata(self.full_path(path))?;
        Ok(self.file_info(path.to_string(), &metadata))
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.full_path(path))?)
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(self.full_path(path))?))
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.create_parent(path)?;
        Ok(fs::write(self.full_path(path), bytes)?)
    }

    fn open_write(&self, path: &str) -> Result<Box<dyn Write + Send>> {
        self.create_parent(path)?;
        Ok(Box::new(File::create(self.full_path(path))?))
    }

    fn copy(&self, src: &str, dst: &str) -> Result<()> {
        self.create_parent(dst)?;
        fs::copy(self.full_path(src), self.full_path(dst))?;
        Ok(())
    }

    fn rename(&self, src: &str, dst: &str) -> Result<()> {
        self.create_parent(dst)?;

        match fs::rename(self.full_path(src), self.full_path(dst)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(e.into()),
            Err(e) => {
                // likely an EXDEV; fall back to copying across the boundary
                warn!(
                    "Failed to rename {} to {} ({}); falling back to copy",
                    src, dst, e
                );
                if self.stat(src)?.is_dir() {
                    self.copy_recursive(src, dst)?;
                } else {
                    self.copy(src, dst)?;
                }
                self.remove(src)
            }
        }
    }

    fn remove(&self, path: &str) -> Result<()> {
        let full = self.full_path(path);

        match fs::metadata(&full) {
            Ok(metadata) if metadata.is_dir() => Ok(fs::remove_dir_all(&full)?),
            Ok(_) => Ok(fs::remove_file(&full)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn mkdir(&self, path: &str) -> Result<Option<String>> {
        let mut first_created = None;
        let mut prefix = String::new();

        for part in path.split('/').filter(|p| !p.is_empty()) {
            prefix = paths::join(&prefix, part);
            if first_created.is_none() && !self.full_path(&prefix).exists() {
                first_created = Some(prefix.clone());
            }
        }

        fs::create_dir_all(self.full_path(path))?;
        Ok(first_created)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>> {
        let mut children = Vec::new();

        for entry in fs::read_dir(self.full_path(path))? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_str().ok_or_else(|| {
                OcflError::General(format!(
                    "Path {} is not valid UTF-8",
                    entry.path().to_string_lossy()
                ))
            })?;
            let metadata = entry.metadata()?;
            children.push(self.file_info(paths::join(path, name), &metadata));
        }

        Ok(children)
    }

    fn list(&self, path: &str, recursive: bool) -> Result<Vec<FileInfo>> {
        let root = self.full_path(path);

        if !root.exists() {
            return Ok(Vec::new());
        }

        if !recursive {
            return Ok(self
                .read_dir(path)?
                .into_iter()
                .filter(|info| !info.is_dir())
                .collect());
        }

        let mut files = Vec::new();

        for entry in WalkDir::new(&root) {
            let entry = entry.map_err(|e| OcflError::General(e.to_string()))?;
            if entry.file_type().is_dir() {
                continue;
            }
            let relative = relative_str(entry.path(), &root)?;
            let metadata = entry.metadata().map_err(|e| OcflError::General(e.to_string()))?;
            files.push(self.file_info(paths::join(path, &relative), &metadata));
        }

        Ok(files)
    }
}

/// Converts the part of `path` under `base` into a `/` separated relative path
fn relative_str(path: &Path, base: &Path) -> Result<String> {
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

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::FsStore;
    use crate::store::Store;

    fn store() -> (TempDir, FsStore) {
        let temp = TempDir::new().unwrap();
        let store = FsStore::new(temp.path()).unwrap();
        (temp, store)
    }

    #[test]
    fn write_read_round_trip() {
        let (_temp, store) = store();

        store.write("a/b/c.txt", b"hello").unwrap();

        assert!(store.exists("a/b/c.txt").unwrap());
        assert_eq!(b"hello".to_vec(), store.read("a/b/c.txt").unwrap());
        assert_eq!(5, store.stat("a/b/c.txt").unwrap().size);
    }

    #[test]
    fn exists_false_for_missing() {
        let (_temp, store) = store();

        assert!(!store.exists("nope").unwrap());
        assert!(store.stat("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn rename_moves_directories() {
        let (_temp, store) = store();

        store.write("src/v1/content/file.txt", b"data").unwrap();
        store.rename("src/v1", "dst/v1").unwrap();

        assert!(!store.exists("src/v1").unwrap());
        assert_eq!(b"data".to_vec(), store.read("dst/v1/content/file.txt").unwrap());
    }

    #[test]
    fn remove_is_recursive_and_idempotent() {
        let (_temp, store) = store();

        store.write("dir/a.txt", b"1").unwrap();
        store.write("dir/sub/b.txt", b"2").unwrap();

        store.remove("dir").unwrap();
        assert!(!store.exists("dir").unwrap());

        store.remove("dir").unwrap();
    }

    #[test]
    fn mkdir_reports_first_created_dir() {
        let (_temp, store) = store();

        store.mkdir("a").unwrap();

        assert_eq!(Some("a/b".to_string()), store.mkdir("a/b/c/d").unwrap());
        assert_eq!(None, store.mkdir("a/b/c/d").unwrap());
    }

    #[test]
    fn list_recursive_returns_files_only() {
        let (_temp, store) = store();

        store.write("root/a.txt", b"1").unwrap();
        store.write("root/sub/b.txt", b"22").unwrap();
        store.mkdir("root/empty").unwrap();

        let mut files: Vec<String> = store
            .list("root", true)
            .unwrap()
            .into_iter()
            .map(|info| info.path)
            .collect();
        files.sort();

        assert_eq!(vec!["root/a.txt".to_string(), "root/sub/b.txt".to_string()], files);

        assert!(store.list("missing", true).unwrap().is_empty());
    }

    #[test]
    fn read_dir_lists_immediate_children() {
        let (_temp, store) = store();

        store.write("root/a.txt", b"1").unwrap();
        store.write("root/sub/b.txt", b"2").unwrap();

        let mut names: Vec<String> = store
            .read_dir("root")
            .unwrap()
            .into_iter()
            .map(|info| info.name().to_string())
            .collect();
        names.sort();

        assert_eq!(vec!["a.txt".to_string(), "sub".to_string()], names);
    }
}
