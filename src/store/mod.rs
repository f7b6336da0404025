use std::fmt::Debug;
use std::io::{Read, Write};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layout::LayoutExtensionName;

pub mod fs;

/// Storage interface consumed by the object and storage layers. Implementations are
/// responsible for the physical files; everything above this trait works exclusively
/// with UTF-8, `/` separated paths relative to the store root.
pub trait Store: Send + Sync {
    /// Returns metadata about the file or directory at the path. Missing paths fail
    /// with an error for which `is_not_found()` is true.
    fn stat(&self, path: &str) -> Result<FileInfo>;

    /// True if a file or directory exists at the path
    fn exists(&self, path: &str) -> Result<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Reads the entire file into memory
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Opens the file for streaming reads
    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    /// Writes the bytes to the path, creating parent directories as needed and
    /// replacing any existing file
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Opens the path for streaming writes, creating parent directories as needed
    fn open_write(&self, path: &str) -> Result<Box<dyn Write + Send>>;

    /// Copies a single file
    fn copy(&self, src: &str, dst: &str) -> Result<()>;

    /// Moves a file or directory. Implementations should rename atomically when they
    /// can, and fall back to copy-and-delete when the source and destination are on
    /// different storage boundaries.
    fn rename(&self, src: &str, dst: &str) -> Result<()>;

    /// Removes the file or directory, recursively. Removing a missing path is not an
    /// error.
    fn remove(&self, path: &str) -> Result<()>;

    /// Creates the directory and any missing parents. Returns the first directory that
    /// was actually created, so the caller can undo the creation on rollback, or `None`
    /// when the directory already existed.
    fn mkdir(&self, path: &str) -> Result<Option<String>>;

    /// Lists the immediate children of the directory
    fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>>;

    /// Lists the files under the directory. An empty vec is returned when the
    /// directory does not exist.
    fn list(&self, path: &str, recursive: bool) -> Result<Vec<FileInfo>>;
}

/// Metadata about a file or directory within a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Store-relative path
    pub path: String,
    pub kind: FileKind,
    /// Size in bytes; 0 for directories
    pub size: u64,
    pub modified: Option<DateTime<Local>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// The final component of the path
    pub fn name(&self) -> &str {
        crate::paths::filename(&self.path)
    }
}

/// `ocfl_layout.json` serialization object
#[derive(Deserialize, Serialize, Debug)]
pub struct OcflLayout {
    extension: LayoutExtensionName,
    description: String,
}

impl OcflLayout {
    pub fn new(extension: LayoutExtensionName, description: &str) -> Self {
        Self {
            extension,
            description: description.to_string(),
        }
    }

    pub fn extension(&self) -> LayoutExtensionName {
        self.extension
    }
}
