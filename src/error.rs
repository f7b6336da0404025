use core::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::{error, io};

use thiserror::Error;

pub type Result<T, E = OcflError> = core::result::Result<T, E>;

/// All errors the crate surfaces
#[derive(Error)]
pub enum OcflError {
    #[error("Unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Inventory of object {object_id} is corrupt: {message}")]
    InventoryCorrupted { object_id: String, message: String },

    #[error("Object {object_id} has no content at {path}")]
    ContentNotFound { object_id: String, path: String },

    #[error("Workspace {0} contains uncommitted changes from a previous update")]
    UncommittedChanges(String),

    #[error("Transaction on object {object_id} already terminated: {state}")]
    TransactionAlreadyCommitted { object_id: String, state: String },

    #[error("Cannot commit object {object_id}: {count} content writer(s) were never finalized")]
    UnfinishedOperations { object_id: String, count: usize },

    #[error("Cannot create object {object_id}: {path} is within an existing object")]
    NestedObjectNotAllowed { object_id: String, path: String },

    #[error("Directory {0} is not empty and bears no OCFL declaration")]
    NonEmptyDirectory(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("{0}")]
    General(String),

    #[error("{0}")]
    Multi(MultiError),

    #[error("{0}")]
    Io(io::Error),

    #[error("{0}")]
    Wrapped(Box<dyn error::Error + Send + Sync>),
}

/// Aggregates the failures of a batch operation that continues past individual errors
#[derive(Debug)]
pub struct MultiError {
    pub failed: usize,
    pub total: usize,
    pub messages: Vec<String>,
}

impl OcflError {
    /// True if the error represents a missing file or path
    pub fn is_not_found(&self) -> bool {
        match self {
            OcflError::NotFound(_) => true,
            OcflError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl MultiError {
    pub fn new(total: usize, messages: Vec<String>) -> Self {
        Self {
            failed: messages.len(),
            total,
            messages,
        }
    }
}

impl Display for MultiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} operations failed: [{}]",
            self.failed,
            self.total,
            self.messages.join("; ")
        )
    }
}

impl Debug for OcflError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl From<io::Error> for OcflError {
    fn from(e: io::Error) -> Self {
        OcflError::Io(e)
    }
}

impl From<serde_json::Error> for OcflError {
    fn from(e: serde_json::Error) -> Self {
        OcflError::Wrapped(Box::new(e))
    }
}
