//! OCFL storage layout extension implementations

use std::borrow::Cow;
use std::convert::TryFrom;

use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use strum_macros::{Display as EnumDisplay, EnumString};
use uriparse::URIReference;

use crate::digest::DigestAlgorithm;
use crate::error::{OcflError, Result};
use crate::paths;

const MAX_0003_ENCAPSULATION_LENGTH: usize = 100;

static NON_ALPHA_PLUS: Lazy<AsciiSet> = Lazy::new(|| NON_ALPHANUMERIC.remove(b'-').remove(b'_'));

/// The storage layout maps object IDs to locations within the storage root
#[derive(Debug)]
pub struct StorageLayout {
    extension: LayoutExtension,
}

/// Enum of known storage layout extensions
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, EnumString, EnumDisplay)]
pub enum LayoutExtensionName {
    #[strum(serialize = "0002-flat-direct-storage-layout")]
    #[serde(rename = "0002-flat-direct-storage-layout")]
    FlatDirectLayout,
    #[strum(serialize = "0004-hashed-n-tuple-storage-layout")]
    #[serde(rename = "0004-hashed-n-tuple-storage-layout")]
    HashedNTupleLayout,
    #[strum(serialize = "0003-hash-and-id-n-tuple-storage-layout")]
    #[serde(rename = "0003-hash-and-id-n-tuple-storage-layout")]
    HashedNTupleObjectIdLayout,
    #[strum(serialize = "000N-path-direct-storage-layout")]
    #[serde(rename = "000N-path-direct-storage-layout")]
    PathDirectLayout,
}

impl StorageLayout {
    pub fn new(name: LayoutExtensionName, config_bytes: Option<&[u8]>) -> Result<Self> {
        let attempt = || -> Result<LayoutExtension> {
            match name {
                LayoutExtensionName::FlatDirectLayout => {
                    Ok(FlatDirectLayoutExtension::new(config_bytes)?.into())
                }
                LayoutExtensionName::HashedNTupleLayout => {
                    Ok(HashedNTupleLayoutExtension::new(config_bytes)?.into())
                }
                LayoutExtensionName::HashedNTupleObjectIdLayout => {
                    Ok(HashedNTupleObjectIdLayoutExtension::new(config_bytes)?.into())
                }
                LayoutExtensionName::PathDirectLayout => {
                    Ok(PathDirectLayoutExtension::new(config_bytes)?.into())
                }
            }
        };

        match attempt() {
            Ok(extension) => Ok(StorageLayout { extension }),
            Err(e) => Err(OcflError::InvalidConfiguration(format!(
                "Failed to parse layout config: {}",
                e
            ))),
        }
    }

    /// Maps an object ID to an object root directory. Fails when the id is incompatible
    /// with the layout.
    pub fn map_object_id(&self, object_id: &str) -> Result<String> {
        self.extension.map_object_id(object_id)
    }

    /// Returns the extension name of the layout extension in use
    pub fn extension_name(&self) -> LayoutExtensionName {
        self.extension.extension_name()
    }

    /// A short human readable description used in `ocfl_layout.json`
    pub fn description(&self) -> &'static str {
        match self.extension {
            LayoutExtension::FlatDirect(_) => {
                "Maps object ids directly to object root directories under the storage root"
            }
            LayoutExtension::HashedNTuple(_) => {
                "Hashed truncated n-tuple trees for OCFL object identifiers"
            }
            LayoutExtension::HashedNTupleObjectId(_) => {
                "Hashed truncated n-tuple trees with object id encapsulating directory"
            }
            LayoutExtension::PathDirect(_) => {
                "Maps URI-like object ids to object root paths mirroring their structure"
            }
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        self.extension.serialize()
    }
}

/// [Flat Direct Storage Layout Extension](https://ocfl.github.io/extensions/0002-flat-direct-storage-layout.html)
#[derive(Debug)]
struct FlatDirectLayoutExtension {
    config: FlatDirectLayoutConfig,
}

/// [Hashed N-Tuple Storage Layout Extension](https://ocfl.github.io/extensions/0004-hashed-n-tuple-storage-layout.html)
#[derive(Debug)]
struct HashedNTupleLayoutExtension {
    config: HashedNTupleLayoutConfig,
}

/// [Hashed N-Tuple with Object ID Encapsulation Storage Layout Extension](https://ocfl.github.io/extensions/0003-hash-and-id-n-tuple-storage-layout.html)
#[derive(Debug)]
struct HashedNTupleObjectIdLayoutExtension {
    config: HashedNTupleObjectIdLayoutConfig,
}

/// Path direct storage layout: object ids are treated as URIs and mapped to object root
/// paths that mirror their structure, terminated by a marker directory.
#[derive(Debug)]
struct PathDirectLayoutExtension {
    config: PathDirectLayoutConfig,
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase", default)]
struct FlatDirectLayoutConfig {
    extension_name: LayoutExtensionName,
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase", default)]
struct HashedNTupleLayoutConfig {
    extension_name: LayoutExtensionName,
    digest_algorithm: DigestAlgorithm,
    tuple_size: usize,
    number_of_tuples: usize,
    short_object_root: bool,
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase", default)]
struct HashedNTupleObjectIdLayoutConfig {
    extension_name: LayoutExtensionName,
    digest_algorithm: DigestAlgorithm,
    tuple_size: usize,
    number_of_tuples: usize,
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase", default)]
struct PathDirectLayoutConfig {
    extension_name: LayoutExtensionName,
    /// When set, the URI scheme does not contribute to the mapped path
    omit_schema: bool,
    /// Ordered list of (pattern, replacement) pairs applied to the id before mapping.
    /// Only the first occurrence of each pattern is replaced.
    replace: Vec<(String, String)>,
    /// Marker directory appended to every mapped path
    suffix: String,
}

#[derive(Debug)]
enum LayoutExtension {
    FlatDirect(FlatDirectLayoutExtension),
    HashedNTuple(HashedNTupleLayoutExtension),
    HashedNTupleObjectId(HashedNTupleObjectIdLayoutExtension),
    PathDirect(PathDirectLayoutExtension),
}

impl FlatDirectLayoutConfig {
    fn validate(&self) -> Result<()> {
        validate_extension_name(&LayoutExtensionName::FlatDirectLayout, &self.extension_name)
    }
}

impl Default for FlatDirectLayoutConfig {
    fn default() -> Self {
        Self {
            extension_name: LayoutExtensionName::FlatDirectLayout,
        }
    }
}

impl HashedNTupleLayoutConfig {
    fn validate(&self) -> Result<()> {
        validate_extension_name(
            &LayoutExtensionName::HashedNTupleLayout,
            &self.extension_name,
        )?;
        validate_tuple_config(self.tuple_size, self.number_of_tuples)?;
        validate_digest_algorithm(self.digest_algorithm, self.tuple_size, self.number_of_tuples)
    }
}

impl Default for HashedNTupleLayoutConfig {
    fn default() -> Self {
        Self {
            extension_name: LayoutExtensionName::HashedNTupleLayout,
            digest_algorithm: DigestAlgorithm::Sha256,
            tuple_size: 3,
            number_of_tuples: 3,
            short_object_root: false,
        }
    }
}

impl HashedNTupleObjectIdLayoutConfig {
    fn validate(&self) -> Result<()> {
        validate_extension_name(
            &LayoutExtensionName::HashedNTupleObjectIdLayout,
            &self.extension_name,
        )?;
        validate_tuple_config(self.tuple_size, self.number_of_tuples)?;
        validate_digest_algorithm(self.digest_algorithm, self.tuple_size, self.number_of_tuples)
    }
}

impl Default for HashedNTupleObjectIdLayoutConfig {
    fn default() -> Self {
        Self {
            extension_name: LayoutExtensionName::HashedNTupleObjectIdLayout,
            digest_algorithm: DigestAlgorithm::Sha256,
            tuple_size: 3,
            number_of_tuples: 3,
        }
    }
}

impl PathDirectLayoutConfig {
    fn validate(&self) -> Result<()> {
        validate_extension_name(&LayoutExtensionName::PathDirectLayout, &self.extension_name)?;

        for (pattern, _) in &self.replace {
            if pattern.is_empty() {
                return Err(OcflError::InvalidConfiguration(
                    "Replace patterns must be non-empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl Default for PathDirectLayoutConfig {
    fn default() -> Self {
        Self {
            extension_name: LayoutExtensionName::PathDirectLayout,
            omit_schema: false,
            replace: Vec::new(),
            suffix: "/__object__".to_string(),
        }
    }
}

impl LayoutExtension {
    fn map_object_id(&self, object_id: &str) -> Result<String> {
        match self {
            LayoutExtension::FlatDirect(ext) => ext.map_object_id(object_id),
            LayoutExtension::HashedNTuple(ext) => ext.map_object_id(object_id),
            LayoutExtension::HashedNTupleObjectId(ext) => ext.map_object_id(object_id),
            LayoutExtension::PathDirect(ext) => ext.map_object_id(object_id),
        }
    }

    fn extension_name(&self) -> LayoutExtensionName {
        match self {
            LayoutExtension::FlatDirect(ext) => ext.config.extension_name,
            LayoutExtension::HashedNTuple(ext) => ext.config.extension_name,
            LayoutExtension::HashedNTupleObjectId(ext) => ext.config.extension_name,
            LayoutExtension::PathDirect(ext) => ext.config.extension_name,
        }
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        match self {
            LayoutExtension::FlatDirect(ext) => Ok(serde_json::to_vec_pretty(&ext.config)?),
            LayoutExtension::HashedNTuple(ext) => Ok(serde_json::to_vec_pretty(&ext.config)?),
            LayoutExtension::HashedNTupleObjectId(ext) => {
                Ok(serde_json::to_vec_pretty(&ext.config)?)
            }
            LayoutExtension::PathDirect(ext) => Ok(serde_json::to_vec_pretty(&ext.config)?),
        }
    }
}

impl From<FlatDirectLayoutExtension> for LayoutExtension {
    fn from(extension: FlatDirectLayoutExtension) -> Self {
        LayoutExtension::FlatDirect(extension)
    }
}

impl From<HashedNTupleLayoutExtension> for LayoutExtension {
    fn from(extension: HashedNTupleLayoutExtension) -> Self {
        LayoutExtension::HashedNTuple(extension)
    }
}

impl From<HashedNTupleObjectIdLayoutExtension> for LayoutExtension {
    fn from(extension: HashedNTupleObjectIdLayoutExtension) -> Self {
        LayoutExtension::HashedNTupleObjectId(extension)
    }
}

impl From<PathDirectLayoutExtension> for LayoutExtension {
    fn from(extension: PathDirectLayoutExtension) -> Self {
        LayoutExtension::PathDirect(extension)
    }
}

impl FlatDirectLayoutExtension {
    fn new(config_bytes: Option<&[u8]>) -> Result<Self> {
        let config = match config_bytes {
            Some(config_bytes) => {
                let config: FlatDirectLayoutConfig = serde_json::from_slice(config_bytes)?;
                config.validate()?;
                config
            }
            None => FlatDirectLayoutConfig::default(),
        };

        Ok(Self { config })
    }

    /// One-to-one mapping from object ID to object root path
    fn map_object_id(&self, object_id: &str) -> Result<String> {
        if object_id.is_empty() {
            return Err(OcflError::IllegalArgument(
                "Object ids may not be empty".to_string(),
            ));
        }

        if object_id.contains('/') {
            return Err(OcflError::IllegalArgument(format!(
                "Object id {} cannot be mapped by layout {} because it contains a path separator",
                object_id, self.config.extension_name
            )));
        }

        if object_id.len() > 255 {
            return Err(OcflError::IllegalArgument(format!(
                "Object id {} cannot be mapped by layout {} because it is longer than 255 characters",
                object_id, self.config.extension_name
            )));
        }

        if object_id == crate::consts::EXTENSIONS_DIR {
            return Err(OcflError::IllegalArgument(format!(
                "Object id {} cannot be mapped by layout {} because the name is reserved",
                object_id, self.config.extension_name
            )));
        }

        Ok(object_id.to_string())
    }
}

impl HashedNTupleLayoutExtension {
    fn new(config_bytes: Option<&[u8]>) -> Result<Self> {
        let config = match config_bytes {
            Some(config_bytes) => {
                let config: HashedNTupleLayoutConfig = serde_json::from_slice(config_bytes)?;
                config.validate()?;
                config
            }
            None => HashedNTupleLayoutConfig::default(),
        };

        Ok(Self { config })
    }

    /// Object IDs are hashed and then divided into tuples to create a pair-tree like layout
    fn map_object_id(&self, object_id: &str) -> Result<String> {
        let digest: String = self
            .config
            .digest_algorithm
            .hash_hex(&mut object_id.as_bytes())?
            .into();

        if self.config.tuple_size == 0 {
            return Ok(digest);
        }

        let mut path = to_tuples(
            &digest,
            self.config.tuple_size,
            self.config.number_of_tuples,
        );

        if self.config.short_object_root {
            let start = self.config.tuple_size * self.config.number_of_tuples;
            path.push_str(&digest[start..]);
        } else {
            path.push_str(&digest);
        }

        Ok(path)
    }
}

impl HashedNTupleObjectIdLayoutExtension {
    fn new(config_bytes: Option<&[u8]>) -> Result<Self> {
        let config = match config_bytes {
            Some(config_bytes) => {
                let config: HashedNTupleObjectIdLayoutConfig =
                    serde_json::from_slice(config_bytes)?;
                config.validate()?;
                config
            }
            None => HashedNTupleObjectIdLayoutConfig::default(),
        };

        Ok(Self { config })
    }

    /// Object IDs are hashed and then divided into tuples to create a pair-tree like
    /// layout. The difference here is that the object encapsulation directory is the
    /// url-encoded object ID
    fn map_object_id(&self, object_id: &str) -> Result<String> {
        let digest: String = self
            .config
            .digest_algorithm
            .hash_hex(&mut object_id.as_bytes())?
            .into();

        if self.config.tuple_size == 0 {
            return Ok(digest);
        }

        let mut path = to_tuples(
            &digest,
            self.config.tuple_size,
            self.config.number_of_tuples,
        );

        // percent encoding produces uppercase hex; lowercase is required
        let encoded = utf8_percent_encode(object_id, &NON_ALPHA_PLUS).to_string();
        let lower = lower_percent_escape(&encoded);

        if lower.len() <= MAX_0003_ENCAPSULATION_LENGTH {
            path.push_str(&lower);
        } else {
            path.push_str(&lower[..MAX_0003_ENCAPSULATION_LENGTH]);
            path.push('-');
            path.push_str(&digest);
        }

        Ok(path)
    }
}

impl PathDirectLayoutExtension {
    fn new(config_bytes: Option<&[u8]>) -> Result<Self> {
        let config = match config_bytes {
            Some(config_bytes) => {
                let config: PathDirectLayoutConfig = serde_json::from_slice(config_bytes)?;
                config.validate()?;
                config
            }
            None => PathDirectLayoutConfig::default(),
        };

        Ok(Self { config })
    }

    /// Ids that parse as URIs map to `scheme_host/path`; anything else maps as a plain
    /// path. The suffix marker directory terminates every mapped path so that object
    /// roots can never nest.
    fn map_object_id(&self, object_id: &str) -> Result<String> {
        if !self.config.suffix.is_empty() && object_id.ends_with(&self.config.suffix) {
            return Err(OcflError::IllegalArgument(format!(
                "Object id {} cannot be mapped by layout {} because it ends with {}",
                object_id, self.config.extension_name, self.config.suffix
            )));
        }

        let mut id = object_id.to_string();
        for (pattern, replacement) in &self.config.replace {
            if let Some(index) = id.find(pattern.as_str()) {
                id.replace_range(index..index + pattern.len(), replacement);
            }
        }

        let path = match URIReference::try_from(id.as_str()) {
            Ok(uri) if uri.scheme().is_some() => {
                let mut parts = Vec::new();

                // The scheme must exist in this branch
                let scheme = uri.scheme().unwrap();
                if !self.config.omit_schema && scheme.as_str() != "file" {
                    parts.push(scheme.as_str().to_string());
                }

                if let Some(host) = uri.host() {
                    let host = host.to_string();
                    if !host.is_empty() {
                        parts.push(host.replace(',', "_").replace(';', "/"));
                    }
                }

                let mut rest = uri.path().to_string();
                if let Some(query) = uri.query() {
                    rest.push('?');
                    rest.push_str(query.as_str());
                }
                if let Some(fragment) = uri.fragment() {
                    rest.push('#');
                    rest.push_str(fragment.as_str());
                }

                paths::join(&parts.join("_"), &rest)
            }
            _ => id,
        };

        let path = path.trim_matches('/');

        if path.is_empty() {
            return Err(OcflError::IllegalArgument(format!(
                "Object id {} cannot be mapped by layout {} because it produces an empty path",
                object_id, self.config.extension_name
            )));
        }

        Ok(paths::join(path, &self.config.suffix))
    }
}

/// Splits the value into N tuples of M size, joined with a /, and ending with a trailing /
fn to_tuples(value: &str, tuple_size: usize, number_of_tuples: usize) -> String {
    let mut path = String::new();

    for i in 0..number_of_tuples {
        let start = i * tuple_size;
        let end = start + tuple_size;
        path.push_str(&value[start..end]);
        path.push('/');
    }

    path
}

/// Transforms an uppercase percent encoded string to lower case, only touching characters
/// that are part of an escape sequence.
fn lower_percent_escape(original: &str) -> Cow<str> {
    if !original.contains('%') {
        return original.into();
    }

    let mut out = String::with_capacity(original.len());
    let mut remaining = 0;

    for c in original.chars() {
        if remaining > 0 {
            out.push(c.to_ascii_lowercase());
            remaining -= 1;
        } else {
            if c == '%' {
                remaining = 2;
            }
            out.push(c);
        }
    }

    Cow::Owned(out)
}

fn validate_extension_name(
    expected: &LayoutExtensionName,
    actual: &LayoutExtensionName,
) -> Result<()> {
    if actual != expected {
        Err(OcflError::InvalidConfiguration(format!(
            "Expected layout extension name {}; Found: {}",
            expected, actual
        )))
    } else {
        Ok(())
    }
}

fn validate_tuple_config(tuple_size: usize, number_of_tuples: usize) -> Result<()> {
    if (tuple_size == 0 || number_of_tuples == 0) && (tuple_size != 0 || number_of_tuples != 0) {
        Err(OcflError::InvalidConfiguration(format!(
            "If tupleSize (={}) or numberOfTuples (={}) is set to 0, then both must be 0.",
            tuple_size, number_of_tuples
        )))
    } else {
        Ok(())
    }
}

fn validate_digest_algorithm(
    algorithm: DigestAlgorithm,
    tuple_size: usize,
    number_of_tuples: usize,
) -> Result<()> {
    let digest: String = algorithm.hash_hex(&mut "test".as_bytes())?.into();
    let total_tuples_length = tuple_size * number_of_tuples;

    if digest.len() < total_tuples_length {
        Err(OcflError::InvalidConfiguration(format!(
            "tupleSize={} and numberOfTuples={} requires a minimum of {} characters. \
             The digest algorithm {} only produces {}.",
            tuple_size,
            number_of_tuples,
            total_tuples_length,
            algorithm,
            digest.len()
        )))
    } else {
        Ok(())
    }
}
