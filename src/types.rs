use core::fmt;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::convert::{TryFrom, TryInto};
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::str::{FromStr, Split};

use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{Display as EnumDisplay, EnumString};

use crate::consts::*;
use crate::digest::HexDigest;
use crate::error::{OcflError, Result};

static VERSION_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^v\d+$"#).unwrap());

/// Represents an [OCFL object version](https://ocfl.io/1.1/spec/#version-directories).
#[derive(Deserialize, Serialize, Debug, Copy, Clone)]
#[serde(try_from = "&str")]
#[serde(into = "String")]
pub struct VersionNum {
    pub number: u32,
    pub width: u32,
}

/// Represents a logical or content path within an inventory.
#[derive(Deserialize, Serialize, Debug, Eq, Ord, PartialOrd, PartialEq, Hash, Clone)]
pub struct InventoryPath(String);

/// The OCFL spec versions this crate understands, most recent first.
#[derive(Debug, Copy, Clone, Eq, PartialEq, EnumString, EnumDisplay)]
pub enum SpecVersion {
    #[strum(serialize = "1.0")]
    Ocfl1_0,
    #[strum(serialize = "1.1")]
    Ocfl1_1,
}

/// A namaste declaration: the marker file's name and its exact content.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct Namaste {
    pub filename: String,
    pub content: String,
}

/// Controls how an update builds on the previous version's state.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UpdateMode {
    /// The new version starts from a copy of the previous version's state
    Merge,
    /// The new version starts empty
    Replace,
}

/// Metadata that is attached to an OCFL version when it is committed.
#[derive(Debug, Default, Clone)]
pub struct CommitMeta {
    pub user_name: Option<String>,
    pub user_address: Option<String>,
    pub message: Option<String>,
    pub created: Option<DateTime<Local>>,
}

/// Options applied when a transaction is committed.
#[derive(Debug, Default, Clone)]
pub struct CommitOptions {
    pub meta: CommitMeta,
    /// Commits even when the new version contains no state change, and is required to
    /// commit history rewriting changes such as purges
    pub force: bool,
}

/// A file within an OCFL object version.
#[derive(Debug, Clone)]
pub struct FileRef {
    /// The file's logical path within the version
    pub logical_path: Rc<InventoryPath>,
    /// The file's digest using the object's content algorithm
    pub digest: Rc<HexDigest>,
    /// The path to the file's content relative the object root
    pub content_path: Rc<InventoryPath>,
    /// The version the file was examined at
    pub version_num: VersionNum,
}

impl VersionNum {
    /// Creates a new VersionNum with width 0
    pub fn new(number: u32) -> Self {
        Self { number, width: 0 }
    }

    /// Creates a new VersionNum
    pub fn with_width(number: u32, width: u32) -> Self {
        Self { number, width }
    }

    /// Returns the previous version, or an Error if the previous version is invalid (less than 1).
    pub fn previous(&self) -> Result<VersionNum> {
        if self.number <= 1 {
            return Err(OcflError::IllegalState(
                "Versions cannot be less than 1".to_string(),
            ));
        }

        Ok(Self {
            number: self.number - 1,
            width: self.width,
        })
    }

    /// Returns the next version, or an Error if the next version is invalid. Version
    /// numbers only have limits if they are zero-padded.
    pub fn next(&self) -> Result<VersionNum> {
        let max = match self.width {
            0 => u64::from(u32::MAX),
            _ => 10u64.pow(self.width) - 1,
        };

        if u64::from(self.number) + 1 > max {
            return Err(OcflError::IllegalState(format!(
                "Version cannot be greater than {}",
                max
            )));
        }

        Ok(Self {
            number: self.number + 1,
            width: self.width,
        })
    }
}

impl TryFrom<&str> for VersionNum {
    type Error = OcflError;

    /// Parses a string in the format of `v1` or `v0002` into a `VersionNum`. An error is
    /// returned if the version string is invalid.
    fn try_from(version: &str) -> Result<Self, Self::Error> {
        if !VERSION_REGEX.is_match(version) {
            return Err(OcflError::IllegalArgument(format!(
                "Invalid version {}",
                version
            )));
        }

        match version[1..].parse::<u32>() {
            Ok(num) => {
                if num < 1 {
                    return Err(OcflError::IllegalArgument(format!(
                        "Invalid version {}",
                        version
                    )));
                }

                let width = match version.starts_with("v0") {
                    true => version.len() - 1,
                    false => 0,
                };

                Ok(Self {
                    number: num,
                    width: width as u32,
                })
            }
            Err(_) => Err(OcflError::IllegalArgument(format!(
                "Invalid version {}",
                version
            ))),
        }
    }
}

impl TryFrom<u32> for VersionNum {
    type Error = OcflError;

    fn try_from(version: u32) -> Result<Self, Self::Error> {
        if version < 1 {
            return Err(OcflError::IllegalArgument(format!(
                "Invalid version number {}",
                version
            )));
        }

        Ok(Self {
            number: version,
            width: 0,
        })
    }
}

impl FromStr for VersionNum {
    type Err = OcflError;

    /// Interprets a string as a version if it is formatted like any of these examples:
    /// `v3`, `v00009`, or `8`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match VersionNum::try_from(s) {
            Ok(v) => Ok(v),
            Err(_) => match u32::from_str(s) {
                Ok(parsed) => Ok(VersionNum::try_from(parsed)?),
                Err(_) => Err(OcflError::IllegalArgument(format!(
                    "Invalid version number {}",
                    s
                ))),
            },
        }
    }
}

impl fmt::Display for VersionNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "v{:0width$}", self.number, width = self.width as usize)
    }
}

impl From<VersionNum> for String {
    fn from(version_num: VersionNum) -> Self {
        format!("{}", version_num)
    }
}

impl PartialEq for VersionNum {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
    }
}

impl Eq for VersionNum {}

impl Hash for VersionNum {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.number.hash(state)
    }
}

impl PartialOrd for VersionNum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionNum {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number.cmp(&other.number)
    }
}

impl InventoryPath {
    /// Returns an iterable containing each segment of the path split on the `/` separator
    pub fn parts(&self) -> Split<char> {
        self.0.split('/')
    }

    /// Returns the parent path of this path.
    pub fn parent(&self) -> InventoryPath {
        match self.0.rfind('/') {
            Some(last_slash) => InventoryPath(self.0.as_str()[0..last_slash].into()),
            None => InventoryPath("".to_string()),
        }
    }

    /// Returns the part of the path that's after the final `/` or the entire path if
    /// there is no `/`
    pub fn filename(&self) -> &str {
        match self.0.rfind('/') {
            Some(last_slash) => &self.0.as_str()[last_slash + 1..],
            None => self.0.as_str(),
        }
    }

    /// Creates a new path by joining this path with another
    pub fn resolve(&self, other: &InventoryPath) -> InventoryPath {
        if self.0.is_empty() {
            other.clone()
        } else {
            InventoryPath(format!("{}/{}", self.0, other.0))
        }
    }

    /// True if `other` equals this path or is a descendant of it when this path is
    /// treated as a directory
    pub fn is_prefix_of(&self, other: &InventoryPath) -> bool {
        other.0 == self.0 || other.0.starts_with(&format!("{}/", self.0))
    }

    /// Rewrites this path's prefix, mapping `src/a/b` to `dst/a/b`. Returns a clone when
    /// the path is `src` itself.
    pub fn rebase(&self, src: &InventoryPath, dst: &InventoryPath) -> InventoryPath {
        if self.0 == src.0 {
            dst.clone()
        } else {
            InventoryPath(format!("{}/{}", dst.0, &self.0[src.0.len() + 1..]))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for InventoryPath {
    type Error = OcflError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let trimmed = value.trim_start_matches('/').trim_end_matches('/');

        if !trimmed.is_empty() {
            let has_illegal_part = trimmed
                .split('/')
                .any(|part| part == "." || part == ".." || part.is_empty());

            if has_illegal_part {
                return Err(OcflError::IllegalArgument(format!(
                    "Paths may not contain '.', '..', or '' parts. Found: {}",
                    value
                )));
            }
        }

        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for InventoryPath {
    type Error = OcflError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.as_str().try_into()
    }
}

impl TryFrom<&String> for InventoryPath {
    type Error = OcflError;

    fn try_from(value: &String) -> Result<Self, Self::Error> {
        value.as_str().try_into()
    }
}

impl TryFrom<Cow<'_, str>> for InventoryPath {
    type Error = OcflError;

    fn try_from(value: Cow<'_, str>) -> Result<Self, Self::Error> {
        value.as_ref().try_into()
    }
}

impl From<InventoryPath> for String {
    fn from(path: InventoryPath) -> Self {
        path.0
    }
}

impl AsRef<String> for InventoryPath {
    fn as_ref(&self) -> &String {
        &self.0
    }
}

impl Display for InventoryPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SpecVersion {
    /// All supported versions, preferred version first
    pub fn all() -> &'static [SpecVersion] {
        &[SpecVersion::Ocfl1_1, SpecVersion::Ocfl1_0]
    }

    /// The namaste declaration found at a storage root
    pub fn root_namaste(&self) -> Namaste {
        Namaste::new(format!("{}{}", ROOT_NAMASTE_BASE, self))
    }

    /// The namaste declaration found at an object root
    pub fn object_namaste(&self) -> Namaste {
        Namaste::new(format!("{}{}", OBJECT_NAMASTE_BASE, self))
    }

    /// The value of the inventory `type` field for this version
    pub fn inventory_type(&self) -> String {
        format!("https://ocfl.io/{}/spec/#inventory", self)
    }

    /// Resolves an inventory `type` value back to a spec version
    pub fn from_inventory_type(inventory_type: &str) -> Result<SpecVersion> {
        for version in SpecVersion::all() {
            if version.inventory_type() == inventory_type {
                return Ok(*version);
            }
        }
        Err(OcflError::IllegalArgument(format!(
            "Unknown inventory type: {}",
            inventory_type
        )))
    }
}

impl Default for SpecVersion {
    fn default() -> Self {
        SpecVersion::Ocfl1_1
    }
}

impl Namaste {
    fn new(value: String) -> Self {
        Self {
            filename: format!("{}{}", NAMASTE_PREFIX, value),
            content: format!("{}\n", value),
        }
    }
}

impl CommitMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the user attribution. An address may not be set without a name.
    pub fn with_user(mut self, name: Option<String>, address: Option<String>) -> Result<Self> {
        if address.is_some() && name.is_none() {
            return Err(OcflError::IllegalArgument(
                "A user address may not be set without a user name".to_string(),
            ));
        }

        self.user_name = name;
        self.user_address = address;
        Ok(self)
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    pub fn with_created(mut self, created: Option<DateTime<Local>>) -> Self {
        self.created = created;
        self
    }
}

impl CommitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_meta(mut self, meta: CommitMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::convert::{TryFrom, TryInto};

    use crate::types::{InventoryPath, SpecVersion, VersionNum};

    #[test]
    fn create_logical_path_when_valid() {
        let value = "foo/.bar/baz.txt";
        let path: InventoryPath = value.try_into().unwrap();
        assert_eq!(value, path.as_str());
    }

    #[test]
    fn create_logical_path_when_root() {
        let path: InventoryPath = "/".try_into().unwrap();
        assert_eq!("", path.as_str());
    }

    #[test]
    fn remove_leading_and_trailing_slashes_from_logical_paths() {
        let path: InventoryPath = "//foo/bar/baz//".try_into().unwrap();
        assert_eq!("foo/bar/baz", path.as_str());
    }

    #[test]
    #[should_panic(expected = "Paths may not contain")]
    fn reject_logical_paths_with_empty_parts() {
        InventoryPath::try_from("foo//bar/baz").unwrap();
    }

    #[test]
    #[should_panic(expected = "Paths may not contain")]
    fn reject_logical_paths_with_single_dot() {
        InventoryPath::try_from("foo/bar/./baz").unwrap();
    }

    #[test]
    #[should_panic(expected = "Paths may not contain")]
    fn reject_logical_paths_with_double_dot() {
        InventoryPath::try_from("foo/bar/../baz").unwrap();
    }

    #[test]
    fn prefix_matching() {
        let dir: InventoryPath = "foo/bar".try_into().unwrap();

        assert!(dir.is_prefix_of(&"foo/bar".try_into().unwrap()));
        assert!(dir.is_prefix_of(&"foo/bar/baz.txt".try_into().unwrap()));
        assert!(!dir.is_prefix_of(&"foo/barbaz".try_into().unwrap()));
        assert!(!dir.is_prefix_of(&"foo".try_into().unwrap()));
    }

    #[test]
    fn rebase_paths() {
        let src: InventoryPath = "a/b".try_into().unwrap();
        let dst: InventoryPath = "x".try_into().unwrap();
        let path: InventoryPath = "a/b/c/d.txt".try_into().unwrap();

        assert_eq!("x/c/d.txt", path.rebase(&src, &dst).as_str());
        assert_eq!("x", src.clone().rebase(&src, &dst).as_str());
    }

    #[test]
    fn parse_version_numbers() {
        let version = VersionNum::try_from("v1").unwrap();
        assert_eq!(1, version.number);
        assert_eq!(0, version.width);
        assert_eq!("v1", version.to_string());

        let version = VersionNum::try_from("v0002").unwrap();
        assert_eq!(2, version.number);
        assert_eq!(4, version.width);
        assert_eq!("v0002", version.to_string());
    }

    #[test]
    fn reject_invalid_version_numbers() {
        assert!(VersionNum::try_from("v0").is_err());
        assert!(VersionNum::try_from("1").is_err());
        assert!(VersionNum::try_from("v-1").is_err());
        assert!(VersionNum::try_from("version").is_err());
    }

    #[test]
    fn padded_versions_have_a_max() {
        let version = VersionNum::try_from("v0999").unwrap();
        assert!(version.next().is_ok());

        let version = VersionNum::with_width(9999, 4);
        assert!(version.next().is_err());

        let version = VersionNum::try_from("v99").unwrap();
        assert!(version.next().is_ok());
    }

    #[test]
    fn previous_requires_a_prior_version() {
        assert!(VersionNum::new(0).previous().is_err());
        assert!(VersionNum::new(1).previous().is_err());
        assert_eq!(1, VersionNum::new(2).previous().unwrap().number);
    }

    #[test]
    fn namaste_values() {
        let namaste = SpecVersion::Ocfl1_1.object_namaste();
        assert_eq!("0=ocfl_object_1.1", namaste.filename);
        assert_eq!("ocfl_object_1.1\n", namaste.content);

        let namaste = SpecVersion::Ocfl1_0.root_namaste();
        assert_eq!("0=ocfl_1.0", namaste.filename);
        assert_eq!("ocfl_1.0\n", namaste.content);
    }

    #[test]
    fn inventory_type_round_trip() {
        assert_eq!(
            "https://ocfl.io/1.1/spec/#inventory",
            SpecVersion::Ocfl1_1.inventory_type()
        );
        assert_eq!(
            SpecVersion::Ocfl1_0,
            SpecVersion::from_inventory_type("https://ocfl.io/1.0/spec/#inventory").unwrap()
        );
        assert!(SpecVersion::from_inventory_type("https://ocfl.io/2.0/spec/#inventory").is_err());
    }
}
