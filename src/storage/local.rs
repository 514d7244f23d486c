use std::collections::BTreeSet;
use std::fs::{self, File, Permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{Algorithm, Key};
use crate::storage::Storage;

const TMP_DIR: &str = "tmp";

/// blobs stored as read-only files under `<root>/<xx>/<rest of key>`
///
/// remotes are read-only mirrors with the same layout, consulted in order by `fetch`.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
    algorithm: Algorithm,
    remotes: Vec<PathBuf>,
}

/// what a fetch had to do
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransferStats {
    pub present: usize,
    pub hardlinked: usize,
    pub copied: usize,
    pub missing: usize,
    pub bytes_transferred: u64,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, algorithm: Algorithm) -> Self {
        Self {
            root: root.into(),
            algorithm,
            remotes: Vec::new(),
        }
    }

    /// add read-only mirrors to fetch from
    pub fn with_remotes(mut self, remotes: impl IntoIterator<Item = PathBuf>) -> Self {
        self.remotes.extend(remotes);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn remotes(&self) -> &[PathBuf] {
        &self.remotes
    }

    /// path of `key` under a storage root with this layout
    pub fn object_path_in(root: &Path, key: &Key) -> PathBuf {
        let (dir, file) = key.to_path_components();
        root.join(dir).join(file)
    }

    pub fn object_path(&self, key: &Key) -> PathBuf {
        Self::object_path_in(&self.root, key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.object_path(key).is_file()
    }

    fn tmp_path(&self) -> Result<PathBuf> {
        let dir = self.root.join(TMP_DIR);
        fs::create_dir_all(&dir).with_path(&dir)?;
        Ok(dir.join(uuid::Uuid::new_v4().to_string()))
    }

    /// move a fully written temp file into place, or drop it if the object exists
    fn commit_tmp(&self, tmp_path: &Path, key: &Key) -> Result<()> {
        let object_path = self.object_path(key);
        if object_path.exists() {
            trace!(%key, "object already stored");
            fs::remove_file(tmp_path).with_path(tmp_path)?;
            return Ok(());
        }

        let object_dir = object_path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&object_dir).with_path(&object_dir)?;
        fs::set_permissions(tmp_path, Permissions::from_mode(0o444)).with_path(tmp_path)?;
        fs::rename(tmp_path, &object_path).with_path(&object_path)?;
        fsync_dir(&object_dir)?;
        debug!(%key, "stored object");
        Ok(())
    }

    /// fetch `keys` from the remotes and report what happened
    pub fn transfer(&self, keys: &[Key]) -> Result<(BTreeSet<Key>, TransferStats)> {
        let mut stats = TransferStats::default();
        let mut available = BTreeSet::new();

        for key in keys {
            if available.contains(key) {
                continue;
            }
            if self.contains(key) {
                stats.present += 1;
                available.insert(key.clone());
                continue;
            }

            let source = self
                .remotes
                .iter()
                .map(|remote| Self::object_path_in(remote, key))
                .find(|path| path.is_file());
            let Some(source) = source else {
                stats.missing += 1;
                continue;
            };

            self.copy_object(&source, key, &mut stats)?;
            available.insert(key.clone());
        }

        debug!(
            present = stats.present,
            hardlinked = stats.hardlinked,
            copied = stats.copied,
            missing = stats.missing,
            "fetch finished"
        );
        Ok((available, stats))
    }

    fn copy_object(&self, source: &Path, key: &Key, stats: &mut TransferStats) -> Result<()> {
        let destination = self.object_path(key);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }

        // hardlink when on the same filesystem, otherwise copy through a temp file
        if fs::hard_link(source, &destination).is_ok() {
            trace!(%key, "hardlinked from remote");
            stats.hardlinked += 1;
            return Ok(());
        }

        let tmp_path = self.tmp_path()?;
        let bytes = fs::copy(source, &tmp_path).with_path(source)?;
        File::open(&tmp_path)
            .and_then(|f| f.sync_all())
            .with_path(&tmp_path)?;
        self.commit_tmp(&tmp_path, key)?;
        trace!(%key, bytes, "copied from remote");
        stats.copied += 1;
        stats.bytes_transferred += bytes;
        Ok(())
    }
}

impl Storage for LocalStorage {
    fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn write(&self, path: &Path) -> Result<Key> {
        let tmp_path = self.tmp_path()?;
        let key = {
            let mut source = File::open(path).with_path(path)?;
            let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
            let key = self
                .algorithm
                .digest_reader(&mut source, |chunk| tmp_file.write_all(chunk))
                .with_path(path)?;
            tmp_file.sync_all().with_path(&tmp_path)?;
            key
        };
        self.commit_tmp(&tmp_path, &key)?;
        Ok(key)
    }

    fn write_bytes(&self, content: &[u8]) -> Result<Key> {
        let key = self.algorithm.digest(content);
        if self.contains(&key) {
            return Ok(key);
        }

        let tmp_path = self.tmp_path()?;
        {
            let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
            tmp_file.write_all(content).with_path(&tmp_path)?;
            tmp_file.sync_all().with_path(&tmp_path)?;
        }
        self.commit_tmp(&tmp_path, &key)?;
        Ok(key)
    }

    fn locate(&self, key: &Key, fetch: bool) -> Result<PathBuf> {
        let path = self.object_path(key);
        if path.is_file() {
            return Ok(path);
        }
        if fetch && self.transfer(std::slice::from_ref(key))?.0.contains(key) {
            return Ok(path);
        }
        Err(Error::ObjectNotFound(key.clone()))
    }

    fn fetch(&self, keys: &[Key]) -> Result<BTreeSet<Key>> {
        Ok(self.transfer(keys)?.0)
    }
}

fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path).with_path(path)?;
    dir.sync_all().with_path(path)?;
    Ok(())
}
