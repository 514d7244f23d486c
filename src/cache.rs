//! memoization of immutable lookups
//!
//! only content read from a committed version is cached. both caches are plain maps
//! behind a read-write lock; a racing repopulation stores an equal value, so
//! lookups never hold the lock across a decode.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::error::Result;
use crate::hash::Key;
use crate::ops::read_tree;
use crate::storage::Storage;
use crate::types::{Tree, TreeNode};
use crate::vcs::DirEntry;
use crate::version::CommitId;

/// nested view of a decoded tree, rooted at the folder its marker stands for
pub type Nested = BTreeMap<String, TreeNode>;

/// decoded trees keyed by `(tree key, fetch)`
#[derive(Debug, Default)]
pub struct TreeCache {
    trees: RwLock<HashMap<(Key, bool), Arc<Tree>>>,
}

impl TreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// decode the tree stored under `key`, consulting the cache only when `cacheable`
    pub fn load(
        &self,
        storage: &dyn Storage,
        key: &Key,
        fetch: bool,
        cacheable: bool,
    ) -> Result<Arc<Tree>> {
        let cache_key = (key.clone(), fetch);
        if cacheable {
            if let Some(tree) = self.trees.read().get(&cache_key) {
                trace!(%key, "tree cache hit");
                return Ok(Arc::clone(tree));
            }
        }

        let tree = Arc::new(read_tree(storage, key, fetch)?);

        if cacheable {
            trace!(%key, entries = tree.len(), "tree cache store");
            self.trees.write().insert(cache_key, Arc::clone(&tree));
        }
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.trees.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.read().is_empty()
    }

    pub fn clear(&self) {
        self.trees.write().clear();
    }
}

/// decoded tree regions found while globbing, keyed by `(commit, folder)`
#[derive(Debug, Default)]
pub struct LookupCache {
    regions: RwLock<HashMap<(CommitId, PathBuf), Arc<Nested>>>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// remember that `folder` at `commit` is fully described by `nested`
    pub fn insert(&self, commit: &CommitId, folder: &Path, nested: Arc<Nested>) {
        self.regions
            .write()
            .insert((commit.clone(), folder.to_path_buf()), nested);
    }

    /// listing of `dir` if it lies inside a known region
    pub fn listing(&self, commit: &CommitId, dir: &Path) -> Option<Vec<DirEntry>> {
        let regions = self.regions.read();
        region_listing(dir, |folder| {
            regions
                .get(&(commit.clone(), folder.to_path_buf()))
                .cloned()
        })
    }

    pub fn len(&self) -> usize {
        self.regions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.read().is_empty()
    }

    pub fn clear(&self) {
        self.regions.write().clear();
    }
}

/// listing of `dir` from the shallowest region containing it
///
/// a path inside a region that is not a folder of it lists as empty.
pub(crate) fn region_listing<F>(dir: &Path, mut region: F) -> Option<Vec<DirEntry>>
where
    F: FnMut(&Path) -> Option<Arc<Nested>>,
{
    let mut ancestors: Vec<&Path> = dir.ancestors().collect();
    ancestors.reverse();
    for folder in ancestors.into_iter().filter(|a| !a.as_os_str().is_empty()) {
        let Some(nested) = region(folder) else {
            continue;
        };
        let rest = dir.strip_prefix(folder).unwrap_or(Path::new(""));
        return Some(nested_listing(&nested, rest));
    }
    None
}

fn nested_listing(nested: &Nested, rest: &Path) -> Vec<DirEntry> {
    let mut node = nested;
    for part in rest.iter() {
        match node.get(part.to_string_lossy().as_ref()) {
            Some(TreeNode::Folder(children)) => node = children,
            _ => return Vec::new(),
        }
    }
    node.iter()
        .map(|(name, child)| DirEntry {
            name: name.clone(),
            is_dir: child.is_folder(),
            is_symlink: false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::hash::Algorithm;
    use crate::storage::LocalStorage;
    use tempfile::tempdir;

    fn k(c: char) -> String {
        c.to_string().repeat(64)
    }

    fn nested() -> Arc<Nested> {
        let tree = Tree::from_entries(vec![("a.png", k('1')), ("sub/b.png", k('2'))], 32).unwrap();
        Arc::new(tree.to_nested())
    }

    #[test]
    fn test_tree_cache_only_when_cacheable() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), Algorithm::Sha256);
        let tree = Tree::from_entries(vec![("x", k('1'))], 32).unwrap();
        let key = storage.write_bytes(&tree.encode().unwrap()).unwrap();

        let cache = TreeCache::new();
        let loaded = cache.load(&storage, &key, false, false).unwrap();
        assert_eq!(*loaded, tree);
        assert_eq!(*loaded, read_tree(&storage, &key, false).unwrap());
        assert!(cache.is_empty());

        let first = cache.load(&storage, &key, false, true).unwrap();
        let second = cache.load(&storage, &key, false, true).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        // the fetch flag is part of the key
        cache.load(&storage, &key, true, true).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_tree_cache_missing_object() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), Algorithm::Sha256);
        let cache = TreeCache::new();
        let key = Algorithm::Sha256.digest(b"absent");
        assert!(matches!(
            cache.load(&storage, &key, false, true),
            Err(Error::ObjectNotFound(_))
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lookup_cache_descends_into_regions() {
        let cache = LookupCache::new();
        let v1 = CommitId::new("v1");
        cache.insert(&v1, Path::new("data/images"), nested());

        assert!(cache.listing(&v1, Path::new("data")).is_none());
        assert!(cache.listing(&CommitId::new("v2"), Path::new("data/images")).is_none());

        let top = cache.listing(&v1, Path::new("data/images")).unwrap();
        assert_eq!(top, vec![DirEntry::file("a.png"), DirEntry::dir("sub")]);

        let sub = cache.listing(&v1, Path::new("data/images/sub")).unwrap();
        assert_eq!(sub, vec![DirEntry::file("b.png")]);

        // inside the region but not a folder of it
        assert!(cache.listing(&v1, Path::new("data/images/a.png")).unwrap().is_empty());
        assert!(cache.listing(&v1, Path::new("data/images/nope")).unwrap().is_empty());
    }

    #[test]
    fn test_shallowest_region_wins() {
        let outer: Arc<Nested> = nested();
        let inner: Arc<Nested> = Arc::new(BTreeMap::new());
        let listing = region_listing(Path::new("a/sub"), |folder| match folder.to_str() {
            Some("a") => Some(Arc::clone(&outer)),
            Some("a/sub") => Some(Arc::clone(&inner)),
            _ => None,
        })
        .unwrap();
        assert_eq!(listing, vec![DirEntry::file("b.png")]);
    }
}
