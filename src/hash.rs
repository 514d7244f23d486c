use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::error::{Error, IoResultExt, Result};

/// suffix that turns a logical name into its hash marker
pub const MARKER_SUFFIX: &str = ".hash";

/// prefix distinguishing a stored tree key from a file key
pub const TREE_PREFIX: &str = "T:";

/// lowercase hex digest identifying one blob in the content store
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    /// parse from hex string, normalizing to lowercase
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || hex::decode(s).is_err() {
            return Err(Error::InvalidKey(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// build from raw digest bytes
    pub fn from_digest(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// number of hex characters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// first 6 hex chars, used in conflict messages
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(6)]
    }

    /// split into path components for the object store
    /// returns (first 2 hex chars, remaining hex chars)
    pub fn to_path_components(&self) -> (&str, &str) {
        self.0.split_at(2.min(self.0.len()))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", &self.0[..self.0.len().min(12)])
    }
}

impl Serialize for Key {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// the content of a hash marker: either a file key or a `T:`-prefixed tree key
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MarkerKey {
    File(Key),
    Tree(Key),
}

impl MarkerKey {
    /// parse the stored form of a marker
    pub fn parse(stored: &str) -> Result<Self> {
        let stored = stored.trim();
        if is_tree(stored) {
            Ok(Self::Tree(Key::from_hex(strip_tree(stored)?)?))
        } else {
            Ok(Self::File(Key::from_hex(stored)?))
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, Self::Tree(_))
    }

    /// the digest, with any tree prefix removed
    pub fn key(&self) -> &Key {
        match self {
            Self::File(key) | Self::Tree(key) => key,
        }
    }

    pub fn into_key(self) -> Key {
        match self {
            Self::File(key) | Self::Tree(key) => key,
        }
    }
}

impl fmt::Display for MarkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(key) => write!(f, "{}", key),
            Self::Tree(key) => write!(f, "{}{}", TREE_PREFIX, key),
        }
    }
}

/// does the stored value denote a tree
pub fn is_tree(stored: &str) -> bool {
    stored.starts_with(TREE_PREFIX)
}

/// remove the tree prefix from a stored value
pub fn strip_tree(stored: &str) -> Result<&str> {
    stored
        .strip_prefix(TREE_PREFIX)
        .ok_or_else(|| Error::HashFormat(format!("\"{}\" is not a tree key", stored)))
}

/// does the final path segment end with `.hash`
pub fn is_marker(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().ends_with(MARKER_SUFFIX))
        .unwrap_or(false)
}

/// `name` -> `name.hash`
pub fn to_marker(path: &Path) -> Result<PathBuf> {
    if is_marker(path) {
        return Err(Error::HashFormat(format!(
            "the path is already a hash: {}",
            path.display()
        )));
    }
    let name = path.file_name().ok_or_else(|| {
        Error::HashFormat(format!("the path has no name: {}", path.display()))
    })?;
    let mut marker = name.to_os_string();
    marker.push(MARKER_SUFFIX);
    Ok(path.with_file_name(marker))
}

/// `name.hash` -> `name`
pub fn from_marker(path: &Path) -> Result<PathBuf> {
    if !is_marker(path) {
        return Err(Error::HashFormat(format!(
            "the path is already not a hash: {}",
            path.display()
        )));
    }
    // is_marker guarantees a utf-8 compatible name with the suffix
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    let stem = &name[..name.len() - MARKER_SUFFIX.len()];
    Ok(path.with_file_name(stem))
}

/// read the key stored in a marker file
pub fn load_marker(path: &Path) -> Result<MarkerKey> {
    let content = fs::read_to_string(path).with_path(path)?;
    MarkerKey::parse(&content)
}

/// write a key into a marker file
pub fn save_marker(path: &Path, key: &MarkerKey) -> Result<()> {
    fs::write(path, key.to_string()).with_path(path)
}

/// hashing algorithm used by a content store
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    #[default]
    Sha256,
    Sha512,
}

impl Algorithm {
    /// digest size in bytes
    pub fn digest_size(&self) -> usize {
        match self {
            Algorithm::Sha256 => 32,
            Algorithm::Sha512 => 64,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// digest an in-memory value
    pub fn digest(&self, content: &[u8]) -> Key {
        match self {
            Algorithm::Sha256 => Key::from_digest(&Sha256::digest(content)),
            Algorithm::Sha512 => Key::from_digest(&Sha512::digest(content)),
        }
    }

    /// digest a stream, calling `sink` with every chunk read
    pub fn digest_reader<R, F>(&self, reader: &mut R, mut sink: F) -> std::io::Result<Key>
    where
        R: Read,
        F: FnMut(&[u8]) -> std::io::Result<()>,
    {
        let mut hasher = StreamHasher::new(*self);
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            sink(&buf[..n])?;
        }
        Ok(hasher.finalize())
    }

    /// digest the bytes of a file on disk
    pub fn digest_file(&self, path: &Path) -> Result<Key> {
        let mut file = File::open(path).with_path(path)?;
        self.digest_reader(&mut file, |_| Ok(())).with_path(path)
    }
}

/// streaming hasher for large files
enum StreamHasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl StreamHasher {
    fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sha256 => Self::Sha256(Sha256::new()),
            Algorithm::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    fn finalize(self) -> Key {
        match self {
            Self::Sha256(h) => Key::from_digest(&h.finalize()),
            Self::Sha512(h) => Key::from_digest(&h.finalize()),
        }
    }
}
