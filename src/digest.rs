use core::{cmp, fmt};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::io;
use std::io::{Read, Write};
use std::sync::Mutex;

use blake2::digest::consts::{U20, U32, U48};
use blake2::{Blake2b, Blake2b512};
use digest::{Digest, DynDigest};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha512, Sha512_256};
use strum_macros::{Display as EnumDisplay, EnumString};

use crate::error::{OcflError, Result};

type Blake2b160 = Blake2b<U20>;
type Blake2b256 = Blake2b<U32>;
type Blake2b384 = Blake2b<U48>;

/// Enum of all supported digest algorithms. `sha256` and `sha512` are the only algorithms
/// that may be used for content addressing; the rest are valid in fixity blocks only.
#[derive(
    Deserialize, Serialize, Debug, Hash, Eq, PartialEq, Copy, Clone, EnumString, EnumDisplay,
)]
pub enum DigestAlgorithm {
    #[serde(rename = "md5")]
    #[strum(serialize = "md5")]
    Md5,
    #[serde(rename = "sha1")]
    #[strum(serialize = "sha1")]
    Sha1,
    #[serde(rename = "sha256")]
    #[strum(serialize = "sha256")]
    Sha256,
    #[serde(rename = "sha512")]
    #[strum(serialize = "sha512")]
    Sha512,
    #[serde(rename = "sha512/256")]
    #[strum(serialize = "sha512/256")]
    Sha512_256,
    #[serde(rename = "blake2b-512")]
    #[strum(serialize = "blake2b-512")]
    Blake2b512,
    #[serde(rename = "blake2b-160")]
    #[strum(serialize = "blake2b-160")]
    Blake2b160,
    #[serde(rename = "blake2b-256")]
    #[strum(serialize = "blake2b-256")]
    Blake2b256,
    #[serde(rename = "blake2b-384")]
    #[strum(serialize = "blake2b-384")]
    Blake2b384,
    #[serde(rename = "crc32")]
    #[strum(serialize = "crc32")]
    Crc32,
    #[serde(rename = "size")]
    #[strum(serialize = "size")]
    Size,
}

/// Object-safe digester. Implementations produce a hex (or decimal, for `size`) string
/// and reset themselves on finalize so that they may be reused.
pub trait Digester: Send {
    fn update(&mut self, bytes: &[u8]);
    fn finalize_reset(&mut self) -> HexDigest;
}

/// Reader wrapper that calculates a digest while reading
pub struct DigestReader<R: Read> {
    digest: Box<dyn Digester>,
    inner: R,
}

/// Writer wrapper that calculates a digest while writing
pub struct DigestWriter<W: Write> {
    digest: Box<dyn Digester>,
    inner: W,
}

/// Writer wrapper that feeds one byte stream to any number of pooled hashers
pub struct MultiDigestWriter<'a, W: Write> {
    digests: Vec<(DigestAlgorithm, PooledHasher<'a>)>,
    inner: W,
}

/// A digest encoded as a hex string
#[derive(Deserialize, Serialize, Debug, Eq, Clone)]
pub struct HexDigest(String);

/// A free-list of hashers keyed by algorithm. Checked out hashers are unavailable for
/// reuse until they are finalized or dropped, at which point they return to the pool
/// reset. The pool is safe to share across import workers.
pub struct HasherPool {
    free: Mutex<HashMap<DigestAlgorithm, Vec<Box<dyn Digester>>>>,
}

/// A hasher on loan from a `HasherPool`
pub struct PooledHasher<'a> {
    pool: &'a HasherPool,
    algorithm: DigestAlgorithm,
    inner: Option<Box<dyn Digester>>,
}

struct HashDigester(Box<dyn DynDigest + Send>);

struct Crc32Digester(crc32fast::Hasher);

struct SizeDigester(u64);

impl DigestAlgorithm {
    /// Maps an OCFL algorithm name to its enum, failing on names this crate does not know
    pub fn from_name(name: &str) -> Result<Self> {
        name.parse()
            .map_err(|_| OcflError::UnsupportedAlgorithm(name.to_string()))
    }

    /// True if the algorithm may be used for content addressing
    pub fn is_content(&self) -> bool {
        matches!(self, DigestAlgorithm::Sha256 | DigestAlgorithm::Sha512)
    }

    /// Hashes the input and returns its hex encoded digest
    pub fn hash_hex(&self, data: &mut impl Read) -> Result<HexDigest> {
        let mut hasher = self.reader(data);
        io::copy(&mut hasher, &mut io::sink())?;
        Ok(hasher.finalize_hex())
    }

    /// Hashes a byte slice and returns its hex encoded digest
    pub fn hash_bytes(&self, bytes: &[u8]) -> HexDigest {
        let mut digester = self.digester();
        digester.update(bytes);
        digester.finalize_reset()
    }

    /// Wraps the specified reader in a `DigestReader`
    pub fn reader<R: Read>(&self, reader: R) -> DigestReader<R> {
        DigestReader::new(self.digester(), reader)
    }

    /// Wraps the specified writer in a `DigestWriter`
    pub fn writer<W: Write>(&self, writer: W) -> DigestWriter<W> {
        DigestWriter::new(self.digester(), writer)
    }

    /// Creates a fresh, unpooled digester
    pub fn digester(&self) -> Box<dyn Digester> {
        match self {
            DigestAlgorithm::Md5 => Box::new(HashDigester(Box::new(Md5::new()))),
            DigestAlgorithm::Sha1 => Box::new(HashDigester(Box::new(Sha1::new()))),
            DigestAlgorithm::Sha256 => Box::new(HashDigester(Box::new(Sha256::new()))),
            DigestAlgorithm::Sha512 => Box::new(HashDigester(Box::new(Sha512::new()))),
            DigestAlgorithm::Sha512_256 => Box::new(HashDigester(Box::new(Sha512_256::new()))),
            DigestAlgorithm::Blake2b512 => Box::new(HashDigester(Box::new(Blake2b512::new()))),
            DigestAlgorithm::Blake2b160 => Box::new(HashDigester(Box::new(Blake2b160::new()))),
            DigestAlgorithm::Blake2b256 => Box::new(HashDigester(Box::new(Blake2b256::new()))),
            DigestAlgorithm::Blake2b384 => Box::new(HashDigester(Box::new(Blake2b384::new()))),
            DigestAlgorithm::Crc32 => Box::new(Crc32Digester(crc32fast::Hasher::new())),
            DigestAlgorithm::Size => Box::new(SizeDigester(0)),
        }
    }
}

impl Digester for HashDigester {
    fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    fn finalize_reset(&mut self) -> HexDigest {
        self.0.finalize_reset().to_vec().into()
    }
}

impl Digester for Crc32Digester {
    fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    fn finalize_reset(&mut self) -> HexDigest {
        let hasher = std::mem::replace(&mut self.0, crc32fast::Hasher::new());
        format!("{:08x}", hasher.finalize()).into()
    }
}

impl Digester for SizeDigester {
    fn update(&mut self, bytes: &[u8]) {
        self.0 += bytes.len() as u64;
    }

    fn finalize_reset(&mut self) -> HexDigest {
        let size = self.0;
        self.0 = 0;
        size.to_string().into()
    }
}

impl HasherPool {
    pub fn new() -> Self {
        Self {
            free: Mutex::new(HashMap::new()),
        }
    }

    /// Borrows a hasher, reusing a previously returned one when available
    pub fn checkout(&self, algorithm: DigestAlgorithm) -> PooledHasher<'_> {
        let mut free = self.free.lock().expect("hasher pool lock poisoned");
        let inner = free
            .get_mut(&algorithm)
            .and_then(Vec::pop)
            .unwrap_or_else(|| algorithm.digester());

        PooledHasher {
            pool: self,
            algorithm,
            inner: Some(inner),
        }
    }

    /// Wraps a writer so that every byte written is fed to a pooled hasher per algorithm
    pub fn multi_writer<W: Write>(
        &self,
        algorithms: &[DigestAlgorithm],
        writer: W,
    ) -> MultiDigestWriter<'_, W> {
        let digests = algorithms
            .iter()
            .map(|algorithm| (*algorithm, self.checkout(*algorithm)))
            .collect();

        MultiDigestWriter {
            digests,
            inner: writer,
        }
    }

    fn give_back(&self, algorithm: DigestAlgorithm, digester: Box<dyn Digester>) {
        let mut free = self.free.lock().expect("hasher pool lock poisoned");
        free.entry(algorithm).or_insert_with(Vec::new).push(digester);
    }

    #[cfg(test)]
    fn free_count(&self, algorithm: DigestAlgorithm) -> usize {
        let free = self.free.lock().unwrap();
        free.get(&algorithm).map(Vec::len).unwrap_or(0)
    }
}

impl Default for HasherPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PooledHasher<'_> {
    pub fn update(&mut self, bytes: &[u8]) {
        if let Some(digester) = self.inner.as_mut() {
            digester.update(bytes);
        }
    }

    /// Finalizes the digest and returns the hasher to its pool
    pub fn finalize_hex(mut self) -> HexDigest {
        match self.inner.take() {
            Some(mut digester) => {
                let digest = digester.finalize_reset();
                self.pool.give_back(self.algorithm, digester);
                digest
            }
            None => HexDigest::from(String::new()),
        }
    }
}

impl Drop for PooledHasher<'_> {
    fn drop(&mut self) {
        if let Some(mut digester) = self.inner.take() {
            digester.finalize_reset();
            self.pool.give_back(self.algorithm, digester);
        }
    }
}

impl<R: Read> DigestReader<R> {
    pub fn new(digest: Box<dyn Digester>, reader: R) -> Self {
        Self {
            digest,
            inner: reader,
        }
    }

    pub fn finalize_hex(mut self) -> HexDigest {
        self.digest.finalize_reset()
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.inner.read(buf)?;

        if result > 0 {
            self.digest.update(&buf[0..result]);
        }

        Ok(result)
    }
}

impl<W: Write> DigestWriter<W> {
    pub fn new(digest: Box<dyn Digester>, writer: W) -> Self {
        Self {
            digest,
            inner: writer,
        }
    }

    pub fn finalize_hex(mut self) -> HexDigest {
        self.digest.finalize_reset()
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.inner.write(buf)?;

        if result > 0 {
            self.digest.update(&buf[0..result]);
        }

        Ok(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<'a, W: Write> MultiDigestWriter<'a, W> {
    pub fn inner(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn finalize_hex(self) -> HashMap<DigestAlgorithm, HexDigest> {
        let mut results = HashMap::with_capacity(self.digests.len());
        for (algorithm, digest) in self.digests {
            results.insert(algorithm, digest.finalize_hex());
        }
        results
    }
}

impl<'a, W: Write> Write for MultiDigestWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.inner.write(buf)?;

        if result > 0 {
            let part = &buf[0..result];
            self.digests
                .iter_mut()
                .for_each(|(_, digest)| digest.update(part));
        }

        Ok(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl From<Vec<u8>> for HexDigest {
    fn from(bytes: Vec<u8>) -> Self {
        Self(hex::encode(bytes))
    }
}

impl From<&str> for HexDigest {
    fn from(digest: &str) -> Self {
        Self(digest.to_string())
    }
}

impl From<String> for HexDigest {
    fn from(digest: String) -> Self {
        Self(digest)
    }
}

impl From<HexDigest> for String {
    fn from(digest: HexDigest) -> Self {
        digest.0
    }
}

impl AsRef<str> for HexDigest {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl Ord for HexDigest {
    /// Case insensitive string comparison
    fn cmp(&self, other: &Self) -> Ordering {
        let left = self.0.as_bytes();
        let right = other.0.as_bytes();

        let l = cmp::min(left.len(), right.len());

        for i in 0..l {
            match left[i]
                .to_ascii_lowercase()
                .cmp(&right[i].to_ascii_lowercase())
            {
                Ordering::Equal => (),
                non_eq => return non_eq,
            }
        }

        left.len().cmp(&right.len())
    }
}

impl PartialOrd for HexDigest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HexDigest {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for HexDigest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

impl Display for HexDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
