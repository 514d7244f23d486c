//! content-addressed storage of blobs

mod local;

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};
use crate::hash::{Algorithm, Key};

pub use local::{LocalStorage, TransferStats};

/// a content store: blobs are addressed by the digest of their bytes
pub trait Storage: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    fn digest_size(&self) -> usize {
        self.algorithm().digest_size()
    }

    /// ingest a file from disk, returning its key
    fn write(&self, path: &Path) -> Result<Key>;

    /// ingest an in-memory value, returning its key
    fn write_bytes(&self, content: &[u8]) -> Result<Key>;

    /// the on-disk location of `key`, fetching from remotes first when `fetch` is set
    fn locate(&self, key: &Key, fetch: bool) -> Result<PathBuf>;

    /// make `keys` available locally, returning the ones that are
    fn fetch(&self, keys: &[Key]) -> Result<BTreeSet<Key>>;
}

/// materialize `key` and hand the open file to `decoder`
pub fn read_with<T, F>(storage: &dyn Storage, key: &Key, fetch: bool, decoder: F) -> Result<T>
where
    F: FnOnce(&mut File) -> Result<T>,
{
    let path = storage.locate(key, fetch)?;
    let mut file = File::open(&path).with_path(&path)?;
    decoder(&mut file)
}
