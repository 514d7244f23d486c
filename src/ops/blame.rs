use std::path::Path;

use tracing::trace;

use crate::error::Result;
use crate::hash::{is_marker, to_marker, Key};
use crate::repo::{Repository, ResolveOptions};
use crate::version::{CommitId, Version};

/// find the commit that introduced the current key of one entry of a tree marker
///
/// walks the marker's history backwards and stops at the first commit where
/// `relative` maps to something else. `None` when the entry is not committed.
pub fn blame(repo: &Repository, path: impl AsRef<Path>, relative: &str) -> Result<Option<CommitId>> {
    let path = path.as_ref();
    let marker = if is_marker(path) {
        path.to_path_buf()
    } else {
        to_marker(path)?
    };

    let Some(mut found) = repo.latest_version(&marker, 0)? else {
        return Ok(None);
    };
    let Some(target) = key_at(repo, &marker, relative, &found)? else {
        return Ok(None);
    };

    let mut skip = 1;
    while let Some(commit) = repo.latest_version(&marker, skip)? {
        if key_at(repo, &marker, relative, &commit)?.as_ref() != Some(&target) {
            break;
        }
        trace!(%commit, relative, "unchanged");
        found = commit;
        skip += 1;
    }
    Ok(Some(found))
}

fn key_at(repo: &Repository, marker: &Path, relative: &str, commit: &CommitId) -> Result<Option<Key>> {
    let options = ResolveOptions::version(Version::Committed(commit.clone()));
    match repo.load_tree(marker, options) {
        Ok(tree) => Ok(tree.get(relative).cloned()),
        Err(e) if e.is_hash_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{Algorithm, MarkerKey};
    use crate::ops::tree_to_hash;
    use crate::storage::{LocalStorage, Storage};
    use crate::types::Tree;
    use crate::vcs::MemoryVcs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn marker(storage: &LocalStorage, files: &[(&str, &[u8])]) -> String {
        let entries: Vec<(String, String)> = files
            .iter()
            .map(|(p, c)| (p.to_string(), storage.write_bytes(c).unwrap().to_string()))
            .collect();
        let tree = Tree::from_entries(entries, 32).unwrap();
        MarkerKey::Tree(tree_to_hash(&tree, storage).unwrap()).to_string()
    }

    #[test]
    fn test_blame() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path().join("storage"), Algorithm::Sha256));

        let mut vcs = MemoryVcs::new();
        vcs.commit("v1", [("data.hash", marker(&storage, &[("a", b"1"), ("b", b"1")]))]);
        vcs.commit("v2", [("data.hash", marker(&storage, &[("a", b"1"), ("b", b"2")]))]);
        let v3 = marker(&storage, &[("a", b"3"), ("b", b"2")]);
        vcs.commit("v3", [("data.hash", v3.clone())]);
        // a commit not touching the marker is skipped by its history
        vcs.commit("v4", [("data.hash", v3), ("other.hash", "x".to_string())]);

        let repo = Repository::with_backends(dir.path(), storage, Arc::new(vcs));
        assert_eq!(blame(&repo, "data.hash", "b").unwrap(), Some(CommitId::new("v2")));
        assert_eq!(blame(&repo, "data", "a").unwrap(), Some(CommitId::new("v3")));
        assert_eq!(blame(&repo, "data.hash", "zzz").unwrap(), None);
        assert_eq!(blame(&repo, "never.hash", "a").unwrap(), None);
    }
}
