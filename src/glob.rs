//! glob over the union of real entries and folders described by tree markers
//!
//! a listing of a folder reports logical names: `name.hash` is shown as `name`,
//! as a folder when it holds a tree key and as a file otherwise. once a tree
//! marker is decoded, everything below its folder comes from the tree alone.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ::glob::{MatchOptions, Pattern};
use tracing::{debug, trace};

use crate::cache::{region_listing, LookupCache, Nested, TreeCache};
use crate::error::{Error, Result};
use crate::hash::{is_marker, to_marker, Key, MarkerKey, MARKER_SUFFIX};
use crate::storage::Storage;
use crate::vcs::DirEntry;
use crate::version::Source;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

enum Segment {
    /// `**`: zero or more folders
    Globstar,
    Pattern(Pattern),
}

struct GlobPattern {
    segments: Vec<Segment>,
    /// a trailing `/` only matches folders
    dirs_only: bool,
}

impl GlobPattern {
    fn parse(pattern: &str) -> Result<Self> {
        if pattern.starts_with('/') {
            return Err(Error::InvalidPattern(format!(
                "only relative patterns are supported: {}",
                pattern
            )));
        }

        let mut segments = Vec::new();
        for part in pattern.split('/') {
            match part {
                "" | "." => continue,
                ".." => {
                    return Err(Error::InvalidPattern(format!(
                        "'..' is not supported: {}",
                        pattern
                    )))
                }
                "**" => {
                    if !matches!(segments.last(), Some(Segment::Globstar)) {
                        segments.push(Segment::Globstar);
                    }
                }
                _ => {
                    let compiled = Pattern::new(part)
                        .map_err(|e| Error::InvalidPattern(format!("{}: {}", pattern, e)))?;
                    segments.push(Segment::Pattern(compiled));
                }
            }
        }
        if segments.is_empty() {
            return Err(Error::InvalidPattern(format!("empty pattern: \"{}\"", pattern)));
        }

        Ok(Self {
            segments,
            dirs_only: pattern.ends_with('/'),
        })
    }
}

/// one traversal over one version of the repository
///
/// regions decoded from committed trees are shared through the `LookupCache`;
/// regions found in the local state live only as long as the traversal.
pub struct VirtualGlob<'a> {
    source: Source<'a>,
    storage: &'a dyn Storage,
    trees: &'a TreeCache,
    lookups: &'a LookupCache,
    fetch: bool,
    regions: HashMap<PathBuf, Arc<Nested>>,
    /// tree markers seen in a listing, decoded on first descent
    pending: HashMap<PathBuf, Key>,
}

impl<'a> VirtualGlob<'a> {
    pub fn new(
        source: Source<'a>,
        storage: &'a dyn Storage,
        trees: &'a TreeCache,
        lookups: &'a LookupCache,
        fetch: bool,
    ) -> Self {
        Self {
            source,
            storage,
            trees,
            lookups,
            fetch,
            regions: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// logical paths below `scope` matching `pattern`, relative to `scope`
    pub fn glob(&mut self, scope: &Path, pattern: &str) -> Result<BTreeSet<PathBuf>> {
        let pattern = GlobPattern::parse(pattern)?;
        self.seed(scope)?;

        let mut matches = BTreeSet::new();
        self.walk(
            scope,
            Path::new(""),
            &pattern.segments,
            pattern.dirs_only,
            &mut matches,
        )?;
        debug!(scope = %scope.display(), count = matches.len(), "glob finished");
        Ok(matches)
    }

    /// logical entries of `dir`, sorted by name
    pub fn list(&mut self, dir: &Path) -> Result<Vec<DirEntry>> {
        if let Some(listing) = self.known_listing(dir) {
            return Ok(listing);
        }
        if let Some(key) = self.pending.remove(dir) {
            self.register(dir, &key)?;
            if let Some(listing) = self.known_listing(dir) {
                return Ok(listing);
            }
        }

        let entries = self.source.list_dir(dir)?;
        let names = Source::names(&entries);
        let mut result = Vec::with_capacity(entries.len());
        for entry in &entries {
            let logical = entry
                .name
                .strip_suffix(MARKER_SUFFIX)
                .filter(|name| !name.is_empty());
            let Some(logical) = logical.filter(|_| !entry.is_dir) else {
                result.push(entry.clone());
                continue;
            };

            let marker = dir.join(&entry.name);
            if names.contains(logical) {
                return Err(Error::NameConflict {
                    path: dir.join(logical),
                    marker,
                });
            }
            match self.source.read_marker(&marker)? {
                Some(MarkerKey::Tree(key)) => {
                    self.pending.insert(dir.join(logical), key);
                    result.push(DirEntry::dir(logical));
                }
                Some(MarkerKey::File(_)) => result.push(DirEntry::file(logical)),
                // a dangling symlink, for instance
                None => trace!(marker = %marker.display(), "unreadable marker skipped"),
            }
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    fn known_listing(&self, dir: &Path) -> Option<Vec<DirEntry>> {
        if let Some(commit) = self.source.commit() {
            if let Some(listing) = self.lookups.listing(commit, dir) {
                return Some(listing);
            }
        }
        region_listing(dir, |folder| self.regions.get(folder).cloned())
    }

    /// decode the tree governing `folder`
    fn register(&mut self, folder: &Path, key: &Key) -> Result<()> {
        let commit = self.source.commit();
        let tree = self
            .trees
            .load(self.storage, key, self.fetch, commit.is_some())?;
        let nested = Arc::new(tree.to_nested());
        trace!(folder = %folder.display(), entries = tree.len(), "decoded tree region");

        if let Some(commit) = commit {
            self.lookups.insert(commit, folder, Arc::clone(&nested));
        }
        self.regions.insert(folder.to_path_buf(), nested);
        Ok(())
    }

    /// the scope itself may sit inside a tree hashed at one of its ancestors
    fn seed(&mut self, scope: &Path) -> Result<()> {
        if self.known_listing(scope).is_some() {
            return Ok(());
        }
        let mut ancestors: Vec<&Path> = scope.ancestors().collect();
        ancestors.reverse();
        for folder in ancestors {
            if folder.as_os_str().is_empty() || is_marker(folder) {
                continue;
            }
            match self.source.read_marker(&to_marker(folder)?)? {
                Some(MarkerKey::Tree(key)) => return self.register(folder, &key),
                // a file: nothing below it
                Some(MarkerKey::File(_)) => return Ok(()),
                None => {}
            }
        }
        Ok(())
    }

    fn walk(
        &mut self,
        dir: &Path,
        logical: &Path,
        segments: &[Segment],
        dirs_only: bool,
        matches: &mut BTreeSet<PathBuf>,
    ) -> Result<()> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(());
        };

        match first {
            Segment::Pattern(pattern) => {
                for entry in self.list(dir)? {
                    if !pattern.matches_with(&entry.name, MATCH_OPTIONS) {
                        continue;
                    }
                    let child_dir = dir.join(&entry.name);
                    let child_logical = logical.join(&entry.name);
                    if rest.is_empty() {
                        if !dirs_only || entry.is_dir {
                            matches.insert(child_logical);
                        }
                    } else if entry.is_dir {
                        self.walk(&child_dir, &child_logical, rest, dirs_only, matches)?;
                    }
                }
            }
            Segment::Globstar => {
                // zero folders
                if rest.is_empty() {
                    if !logical.as_os_str().is_empty() {
                        matches.insert(logical.to_path_buf());
                    }
                } else {
                    self.walk(dir, logical, rest, dirs_only, matches)?;
                }

                for entry in self.list(dir)? {
                    if entry.name.starts_with('.') {
                        continue;
                    }
                    let child_dir = dir.join(&entry.name);
                    let child_logical = logical.join(&entry.name);
                    if entry.is_dir && !entry.is_symlink {
                        self.walk(&child_dir, &child_logical, segments, dirs_only, matches)?;
                    } else if rest.is_empty() && (entry.is_dir || !dirs_only) {
                        // symlinked folders match but are not descended into
                        matches.insert(child_logical);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{save_marker, Algorithm};
    use crate::storage::LocalStorage;
    use crate::types::Tree;
    use crate::vcs::MemoryVcs;
    use crate::version::{CommitId, Version};
    use std::fs;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        storage: LocalStorage,
        trees: TreeCache,
        lookups: LookupCache,
        vcs: MemoryVcs,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let root = dir.path().join("repo");
            fs::create_dir(&root).unwrap();
            let storage = LocalStorage::new(dir.path().join("storage"), Algorithm::Sha256);
            Self {
                _dir: dir,
                root,
                storage,
                trees: TreeCache::new(),
                lookups: LookupCache::new(),
                vcs: MemoryVcs::new(),
            }
        }

        fn tree_marker(&self, relative: &str, files: &[(&str, &[u8])]) -> String {
            let entries: Vec<(String, String)> = files
                .iter()
                .map(|(p, content)| {
                    (p.to_string(), self.storage.write_bytes(content).unwrap().to_string())
                })
                .collect();
            let tree = Tree::from_entries(entries, 32).unwrap();
            let key = self.storage.write_bytes(&tree.encode().unwrap()).unwrap();
            let marker = MarkerKey::Tree(key);
            let path = self.root.join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            save_marker(&path, &marker).unwrap();
            marker.to_string()
        }

        fn file(&self, relative: &str, content: &str) {
            let path = self.root.join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        fn glob(&self, version: &Version, scope: &str, pattern: &str) -> Result<Vec<String>> {
            let source = Source::new(&self.root, &self.vcs, version);
            let mut engine =
                VirtualGlob::new(source, &self.storage, &self.trees, &self.lookups, false);
            Ok(engine
                .glob(Path::new(scope), pattern)?
                .into_iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect())
        }
    }

    #[test]
    fn test_glob_inside_tree_marker() {
        let fx = Fixture::new();
        fx.tree_marker("images.hash", &[("a.png", b"a"), ("b.png", b"b"), ("c.txt", b"c")]);

        let found = fx.glob(&Version::Local, "", "images/*.png").unwrap();
        assert_eq!(found, vec!["images/a.png", "images/b.png"]);
    }

    #[test]
    fn test_glob_mixes_real_and_synthetic_entries() {
        let fx = Fixture::new();
        fx.file("data/real.csv", "x");
        fx.tree_marker("data/set.hash", &[("one.csv", b"1"), ("deep/two.csv", b"2")]);
        save_marker(
            &fx.root.join("data/single.csv.hash"),
            &MarkerKey::File(Algorithm::Sha256.digest(b"s")),
        )
        .unwrap();

        let top = fx.glob(&Version::Local, "", "data/*").unwrap();
        assert_eq!(top, vec!["data/real.csv", "data/set", "data/single.csv"]);

        let all = fx.glob(&Version::Local, "", "data/**/*.csv").unwrap();
        assert_eq!(
            all,
            vec![
                "data/real.csv",
                "data/set/deep/two.csv",
                "data/set/one.csv",
                "data/single.csv"
            ]
        );

        let dirs = fx.glob(&Version::Local, "", "data/**/").unwrap();
        assert_eq!(dirs, vec!["data", "data/set", "data/set/deep"]);
    }

    #[test]
    fn test_glob_name_conflict() {
        let fx = Fixture::new();
        fx.file("foo", "plain");
        save_marker(
            &fx.root.join("foo.hash"),
            &MarkerKey::File(Algorithm::Sha256.digest(b"plain")),
        )
        .unwrap();

        assert!(matches!(
            fx.glob(&Version::Local, "", "*"),
            Err(Error::NameConflict { .. })
        ));
    }

    #[test]
    fn test_glob_scope_inside_tree() {
        let fx = Fixture::new();
        fx.tree_marker("images.hash", &[("x/a.png", b"a"), ("x/b.png", b"b")]);

        let found = fx.glob(&Version::Local, "images/x", "*.png").unwrap();
        assert_eq!(found, vec!["a.png", "b.png"]);
    }

    #[test]
    fn test_glob_outer_tree_hides_inner_markers() {
        let fx = Fixture::new();
        fx.tree_marker("data.hash", &[("a.bin", b"outer")]);
        // an independently hashed folder absorbed by the outer tree
        fx.tree_marker("data/inner.hash", &[("b.bin", b"inner")]);

        let found = fx.glob(&Version::Local, "data", "**").unwrap();
        assert_eq!(found, vec!["a.bin"]);
    }

    #[test]
    fn test_glob_hidden_and_case() {
        let fx = Fixture::new();
        fx.file(".hidden", "x");
        fx.file("Upper.TXT", "x");
        fx.file("lower.txt", "x");

        assert_eq!(fx.glob(&Version::Local, "", "*").unwrap(), vec!["Upper.TXT", "lower.txt"]);
        assert_eq!(fx.glob(&Version::Local, "", "*.txt").unwrap(), vec!["lower.txt"]);
        assert_eq!(fx.glob(&Version::Local, "", ".*").unwrap(), vec![".hidden"]);
    }

    #[test]
    fn test_glob_committed_uses_shared_cache() {
        let mut fx = Fixture::new();
        let stored = fx.tree_marker("images.hash", &[("a.png", b"a")]);
        fx.vcs.commit("v1", [("images.hash", stored)]);
        // the working copy no longer has the marker
        fs::remove_file(fx.root.join("images.hash")).unwrap();

        let v1 = Version::Committed(CommitId::new("v1"));
        assert_eq!(fx.glob(&v1, "", "images/*").unwrap(), vec!["images/a.png"]);
        assert_eq!(fx.lookups.len(), 1);
        assert_eq!(fx.trees.len(), 1);

        assert!(fx.glob(&Version::Local, "", "images/*").unwrap().is_empty());
    }

    #[test]
    fn test_glob_local_is_not_cached() {
        let fx = Fixture::new();
        fx.tree_marker("images.hash", &[("a.png", b"a")]);
        fx.glob(&Version::Local, "", "images/*").unwrap();
        assert!(fx.lookups.is_empty());
        assert!(fx.trees.is_empty());

        // a changed marker is seen by the next traversal
        fx.tree_marker("images.hash", &[("b.png", b"b")]);
        assert_eq!(fx.glob(&Version::Local, "", "images/*").unwrap(), vec!["images/b.png"]);
    }

    #[test]
    fn test_invalid_patterns() {
        let fx = Fixture::new();
        for pattern in ["/abs", "", "a/../b", "a**b"] {
            assert!(
                matches!(fx.glob(&Version::Local, "", pattern), Err(Error::InvalidPattern(_))),
                "{} should be rejected",
                pattern
            );
        }
    }
}
