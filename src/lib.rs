//! This library is a storage agnostic implementation of the
//! [OCFL](https://ocfl.io/) object versioning model. Objects are content addressed,
//! deduplicated, and updated through copy-on-write transactions that stage a new
//! version in a workspace and publish it atomically. It is **not** thread-safe.
//!
//! Create a storage root and an object as follows:
//!
//! ```no_run
//! use std::sync::Arc;
//! use ocflkit::layout::{LayoutExtensionName, StorageLayout};
//! use ocflkit::store::fs::FsStore;
//! use ocflkit::{OcflStorage, Result, SpecVersion};
//!
//! fn main() -> Result<()> {
//!     let store = Arc::new(FsStore::new("path/to/storage/root")?);
//!     let layout = StorageLayout::new(LayoutExtensionName::HashedNTupleLayout, None)?;
//!     let storage = OcflStorage::create(store, layout, SpecVersion::default())?;
//!
//!     let object = storage.object("urn:example:1")?;
//!     object.update(|tx| {
//!         tx.write("dir/file.txt", b"contents")?;
//!         Ok(())
//!     })?;
//!
//!     Ok(())
//! }
//! ```

mod bimap;
mod consts;
pub mod digest;
pub mod error;
mod inventory;
pub mod layout;
mod object;
mod paths;
mod storage;
pub mod store;
mod transaction;
mod types;
mod util;

pub use self::digest::{DigestAlgorithm, HexDigest};
pub use self::error::{OcflError, Result};
pub use self::inventory::{Inventory, StateDiff, Version};
pub use self::object::{FileSelector, ObjectConfig, OcflObject};
pub use self::storage::{ObjectIter, OcflStorage};
pub use self::transaction::{ContentWriter, Transaction};
pub use self::types::{
    CommitMeta, CommitOptions, FileRef, InventoryPath, SpecVersion, UpdateMode, VersionNum,
};
