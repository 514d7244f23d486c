use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::cache::{LookupCache, TreeCache};
use crate::config::{find_repo_root, Config, CONFIG_FILE};
use crate::error::{Error, IoResultExt, Result};
use crate::glob::VirtualGlob;
use crate::hash::{from_marker, is_marker, to_marker, Key, MarkerKey};
use crate::storage::{LocalStorage, Storage};
use crate::types::Tree;
use crate::vcs::{SubprocessGit, Vcs};
use crate::version::{clean_relative, to_posix, CommitId, Source, Version};

/// per-call overrides of the repository defaults
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    pub version: Option<Version>,
    pub fetch: Option<bool>,
    pub check: Option<bool>,
}

impl ResolveOptions {
    pub fn version(version: Version) -> Self {
        Self {
            version: Some(version),
            ..Default::default()
        }
    }

    pub fn local() -> Self {
        Self::version(Version::Local)
    }

    pub fn with_fetch(mut self, fetch: bool) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn with_check(mut self, check: bool) -> Self {
        self.check = Some(check);
        self
    }
}

struct Settings {
    version: Version,
    fetch: bool,
    check: bool,
}

/// which marker governs a path
enum Boundary {
    /// a marker on a strict ancestor folder
    Ancestor { folder: PathBuf, key: MarkerKey },
    /// the path's own marker
    Own(MarkerKey),
    Missing,
}

/// resolution context: a working copy, its storage and its history
///
/// clones and scoped views made with [`Repository::join`] share both caches.
#[derive(Clone)]
pub struct Repository {
    root: PathBuf,
    prefix: PathBuf,
    storage: Arc<dyn Storage>,
    vcs: Arc<dyn Vcs>,
    fetch: bool,
    version: Option<Version>,
    check: bool,
    trees: Arc<TreeCache>,
    lookups: Arc<LookupCache>,
}

impl Repository {
    /// write a fresh config at `root` pointing at `storage_root`
    pub fn init(root: &Path, storage_root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            return Err(Error::RepoExists(root.to_path_buf()));
        }
        fs::create_dir_all(root).with_path(root)?;

        let config = Config::new(storage_root);
        let storage_path = config.storage_root(root);
        fs::create_dir_all(&storage_path).with_path(&storage_path)?;
        config.save(&config_path)?;

        Self::open(root)
    }

    /// open the repository whose config lives at `root`
    pub fn open(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(Error::NoRepo(root.to_path_buf()));
        }
        let config = Config::load(&config_path)?;

        let storage = LocalStorage::new(config.storage_root(root), config.storage.algorithm)
            .with_remotes(config.remote_paths(root));
        let vcs = SubprocessGit::new(root);
        Ok(Self::with_backends(root, Arc::new(storage), Arc::new(vcs)))
    }

    /// open the repository containing `start`
    pub fn discover(start: &Path) -> Result<Self> {
        Self::open(&find_repo_root(start)?)
    }

    pub fn with_backends(root: &Path, storage: Arc<dyn Storage>, vcs: Arc<dyn Vcs>) -> Self {
        Self {
            root: root.to_path_buf(),
            prefix: PathBuf::new(),
            storage,
            vcs,
            fetch: false,
            version: None,
            check: false,
            trees: Arc::new(TreeCache::new()),
            lookups: Arc::new(LookupCache::new()),
        }
    }

    pub fn with_fetch(mut self, fetch: bool) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    /// a view scoped to `prefix`, sharing caches and defaults
    pub fn join(&self, prefix: impl AsRef<Path>) -> Result<Self> {
        let prefix = self.relative(prefix.as_ref())?;
        Ok(Self {
            prefix,
            ..self.clone()
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// absolute location of this view
    pub fn path(&self) -> PathBuf {
        self.root.join(&self.prefix)
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn vcs(&self) -> &Arc<dyn Vcs> {
        &self.vcs
    }

    pub fn tree_cache(&self) -> &TreeCache {
        &self.trees
    }

    pub fn lookup_cache(&self) -> &LookupCache {
        &self.lookups
    }

    /// the content key a logical path refers to
    pub fn resolve_key(&self, path: impl AsRef<Path>, options: ResolveOptions) -> Result<Key> {
        let settings = self.settings(options)?;
        let relative = self.logical(path.as_ref())?;
        let source = self.source(&settings.version);
        if settings.version.is_local() {
            self.check_name_conflict(&source, &relative)?;
        }
        self.key_at(&source, &relative, settings.fetch)
    }

    /// like `resolve_key`, but a path nothing resolves is `None`
    pub fn find_key(&self, path: impl AsRef<Path>, options: ResolveOptions) -> Result<Option<Key>> {
        match self.resolve_key(path, options) {
            Ok(key) => Ok(Some(key)),
            Err(Error::HashNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// the tree behind a path's own marker
    ///
    /// markers of ancestor folders are not consulted: a folder inside a hashed
    /// tree has no tree of its own.
    pub fn load_tree(&self, path: impl AsRef<Path>, options: ResolveOptions) -> Result<Tree> {
        let settings = self.settings(options)?;
        let relative = self.logical(path.as_ref())?;
        let source = self.source(&settings.version);
        if settings.version.is_local() {
            self.check_name_conflict(&source, &relative)?;
        }
        if relative.as_os_str().is_empty() {
            return Err(Error::HashNotFound(relative));
        }

        match source.read_marker(&to_marker(&relative)?)? {
            Some(MarkerKey::Tree(key)) => {
                Ok(self.decode(&source, &key, settings.fetch)?.as_ref().clone())
            }
            Some(MarkerKey::File(_)) => Err(Error::HashedFile(relative)),
            None => Err(Error::HashNotFound(relative)),
        }
    }

    /// a readable location of the content a path refers to
    ///
    /// under the local version a plain file is its own location. with `check`
    /// the stored bytes are digested again and must match the key.
    pub fn resolve_path(&self, path: impl AsRef<Path>, options: ResolveOptions) -> Result<PathBuf> {
        let settings = self.settings(options)?;
        let relative = self.logical(path.as_ref())?;
        let source = self.source(&settings.version);
        if settings.version.is_local() {
            self.check_name_conflict(&source, &relative)?;
            let plain = self.root.join(&relative);
            if plain.exists() {
                return Ok(plain);
            }
        }

        let key = self.key_at(&source, &relative, settings.fetch)?;
        let location = self.storage.locate(&key, settings.fetch)?;

        if settings.check {
            let actual = self.storage.algorithm().digest_file(&location)?;
            if actual != key {
                return Err(Error::InconsistentHash {
                    path: relative,
                    expected: key,
                    actual,
                });
            }
        }
        Ok(location)
    }

    /// logical paths matching `pattern` below this view, relative to it
    pub fn glob(&self, pattern: &str, options: ResolveOptions) -> Result<BTreeSet<PathBuf>> {
        let settings = self.settings(options)?;
        let source = self.source(&settings.version);
        let mut engine = VirtualGlob::new(
            source,
            self.storage.as_ref(),
            &self.trees,
            &self.lookups,
            settings.fetch,
        );
        engine.glob(&self.prefix, pattern)
    }

    /// the `skip`-th most recent commit touching a path
    ///
    /// a path missing from the working copy is looked up through its marker.
    pub fn latest_version(&self, path: impl AsRef<Path>, skip: usize) -> Result<Option<CommitId>> {
        let relative = self.relative(path.as_ref())?;
        let relative = if !is_marker(&relative)
            && !relative.as_os_str().is_empty()
            && !self.root.join(&relative).exists()
        {
            to_marker(&relative)?
        } else {
            relative
        };
        self.vcs.latest_version(&relative, skip)
    }

    fn settings(&self, options: ResolveOptions) -> Result<Settings> {
        let version = options
            .version
            .or_else(|| self.version.clone())
            .ok_or(Error::MissingVersion)?;
        Ok(Settings {
            version,
            fetch: options.fetch.unwrap_or(self.fetch),
            check: options.check.unwrap_or(self.check),
        })
    }

    fn source<'a>(&'a self, version: &'a Version) -> Source<'a> {
        Source::new(&self.root, self.vcs.as_ref(), version)
    }

    /// `path` relative to the repository root, normalized
    fn relative(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            return Err(Error::AbsolutePath(path.to_path_buf()));
        }
        clean_relative(&self.prefix.join(path)).ok_or_else(|| Error::AbsolutePath(path.to_path_buf()))
    }

    /// like `relative`, with a marker path mapped to the name it stands for
    fn logical(&self, path: &Path) -> Result<PathBuf> {
        let relative = self.relative(path)?;
        if is_marker(&relative) {
            from_marker(&relative)
        } else {
            Ok(relative)
        }
    }

    fn check_name_conflict(&self, source: &Source<'_>, relative: &Path) -> Result<()> {
        if relative.as_os_str().is_empty() {
            return Ok(());
        }
        let marker = to_marker(relative)?;
        if source.exists(relative)? && source.exists(&marker)? {
            return Err(Error::NameConflict {
                path: relative.to_path_buf(),
                marker,
            });
        }
        Ok(())
    }

    /// the shallowest ancestor marker wins; the path's own marker comes last
    fn boundary(&self, source: &Source<'_>, relative: &Path) -> Result<Boundary> {
        if relative.as_os_str().is_empty() {
            return Ok(Boundary::Missing);
        }

        let mut ancestors: Vec<&Path> = relative
            .ancestors()
            .skip(1)
            .filter(|a| !a.as_os_str().is_empty())
            .collect();
        ancestors.reverse();

        for folder in ancestors {
            if is_marker(folder) {
                continue;
            }
            if let Some(key) = source.read_marker(&to_marker(folder)?)? {
                debug!(folder = %folder.display(), tree = key.is_tree(), "ancestor marker");
                return Ok(Boundary::Ancestor {
                    folder: folder.to_path_buf(),
                    key,
                });
            }
        }

        match source.read_marker(&to_marker(relative)?)? {
            Some(key) => {
                trace!(path = %relative.display(), tree = key.is_tree(), "own marker");
                Ok(Boundary::Own(key))
            }
            None => Ok(Boundary::Missing),
        }
    }

    fn key_at(&self, source: &Source<'_>, relative: &Path, fetch: bool) -> Result<Key> {
        match self.boundary(source, relative)? {
            Boundary::Ancestor {
                folder,
                key: MarkerKey::Tree(key),
            } => {
                let tree = self.decode(source, &key, fetch)?;
                let inner = to_posix(relative.strip_prefix(&folder).unwrap_or(relative));
                if let Some(key) = tree.get(&inner) {
                    return Ok(key.clone());
                }
                if tree.folders().contains(&inner) {
                    return Err(Error::FolderInsideTree(relative.to_path_buf()));
                }
                Err(Error::HashNotFound(relative.to_path_buf()))
            }
            Boundary::Ancestor {
                folder,
                key: MarkerKey::File(_),
            } => Err(file_hashed_folder(&folder)),
            Boundary::Own(MarkerKey::File(key)) => Ok(key),
            Boundary::Own(MarkerKey::Tree(_)) => Err(Error::HashedFolder(relative.to_path_buf())),
            Boundary::Missing => Err(Error::HashNotFound(relative.to_path_buf())),
        }
    }

    /// committed trees are cached, local ones are decoded every time
    fn decode(&self, source: &Source<'_>, key: &Key, fetch: bool) -> Result<Arc<Tree>> {
        self.trees
            .load(self.storage.as_ref(), key, fetch, source.commit().is_some())
    }
}

fn file_hashed_folder(folder: &Path) -> Error {
    Error::HashFormat(format!(
        "the folder \"{}\" is hashed as a single file",
        folder.display()
    ))
}
