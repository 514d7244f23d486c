use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::error::{IoResultExt, Result};
use crate::hash::{load_marker, save_marker, Key, MarkerKey};
use crate::ops::HashValue;
use crate::storage::{read_with, Storage};
use crate::types::Tree;

/// read a marker file, decoding the tree it points to
pub fn load_hash(marker: &Path, storage: &dyn Storage, fetch: bool) -> Result<HashValue> {
    match load_marker(marker)? {
        MarkerKey::File(key) => Ok(HashValue::File(key)),
        MarkerKey::Tree(key) => read_tree(storage, &key, fetch).map(HashValue::Tree),
    }
}

/// write a value into a marker file; trees are stored first
pub fn save_hash(value: &HashValue, marker: &Path, storage: &dyn Storage) -> Result<MarkerKey> {
    let key = match value {
        HashValue::File(key) => MarkerKey::File(key.clone()),
        HashValue::Tree(tree) => MarkerKey::Tree(tree_to_hash(tree, storage)?),
    };
    save_marker(marker, &key)?;
    debug!(marker = %marker.display(), %key, "saved marker");
    Ok(key)
}

/// store the canonical encoding of a tree, returning its key
pub fn tree_to_hash(tree: &Tree, storage: &dyn Storage) -> Result<Key> {
    storage.write_bytes(&tree.encode()?)
}

/// decode the tree stored under `key`
pub fn read_tree(storage: &dyn Storage, key: &Key, fetch: bool) -> Result<Tree> {
    let digest_size = storage.digest_size();
    read_with(storage, key, fetch, |file| {
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).with_path(key.as_str())?;
        Tree::decode(&bytes, digest_size)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Algorithm;
    use crate::storage::LocalStorage;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_tree_hash() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("storage"), Algorithm::Sha256);
        let k1 = storage.write_bytes(b"one").unwrap();
        let tree = Tree::from_entries(vec![("x/one.txt", k1.as_str())], 32).unwrap();

        let marker = dir.path().join("folder.hash");
        let stored = save_hash(&HashValue::Tree(tree.clone()), &marker, &storage).unwrap();
        assert!(stored.is_tree());
        assert!(fs::read_to_string(&marker).unwrap().starts_with("T:"));

        assert_eq!(
            load_hash(&marker, &storage, false).unwrap(),
            HashValue::Tree(tree)
        );
    }

    #[test]
    fn test_save_and_load_file_hash() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("storage"), Algorithm::Sha256);
        let key = storage.write_bytes(b"blob").unwrap();

        let marker = dir.path().join("blob.bin.hash");
        save_hash(&HashValue::File(key.clone()), &marker, &storage).unwrap();
        assert_eq!(fs::read_to_string(&marker).unwrap(), key.as_str());
        assert_eq!(load_hash(&marker, &storage, false).unwrap(), HashValue::File(key));
    }

    #[test]
    fn test_tree_to_hash_is_deterministic() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), Algorithm::Sha256);
        let k = "ab".repeat(32);
        let t1 = Tree::from_entries(vec![("b", k.as_str()), ("a", k.as_str())], 32).unwrap();
        let t2 = Tree::from_entries(vec![("a", k.as_str()), ("b", k.as_str())], 32).unwrap();
        assert_eq!(
            tree_to_hash(&t1, &storage).unwrap(),
            tree_to_hash(&t2, &storage).unwrap()
        );
    }
}
