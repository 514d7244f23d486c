//! data versions and the marker sources they read from

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};
use crate::hash::MarkerKey;
use crate::vcs::{DirEntry, Vcs};

/// opaque commit handle understood by the version-control backend (hash, tag, branch)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// which state of the repository a lookup reads
///
/// only `Committed` content is immutable, so only it carries a hashable handle
/// that caches can be keyed by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Version {
    /// the uncommitted working tree
    Local,
    /// a historical snapshot
    Committed(CommitId),
}

impl Version {
    pub fn committed(id: impl Into<String>) -> Self {
        Version::Committed(CommitId::new(id))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Version::Local)
    }

    pub fn commit(&self) -> Option<&CommitId> {
        match self {
            Version::Local => None,
            Version::Committed(id) => Some(id),
        }
    }
}

impl From<CommitId> for Version {
    fn from(id: CommitId) -> Self {
        Version::Committed(id)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Local => f.write_str("local"),
            Version::Committed(id) => write!(f, "{}", id),
        }
    }
}

/// answers "does this marker exist, what does it contain, what is in this folder"
/// for one version of the repository. paths are relative to the repository root.
#[derive(Clone, Copy)]
pub enum Source<'a> {
    Local {
        root: &'a Path,
    },
    Committed {
        vcs: &'a dyn Vcs,
        commit: &'a CommitId,
    },
}

impl<'a> Source<'a> {
    pub fn new(root: &'a Path, vcs: &'a dyn Vcs, version: &'a Version) -> Self {
        match version {
            Version::Local => Source::Local { root },
            Version::Committed(commit) => Source::Committed { vcs, commit },
        }
    }

    /// the commit to key caches by, `None` for the uncacheable local state
    pub fn commit(&self) -> Option<&'a CommitId> {
        match self {
            Source::Local { .. } => None,
            Source::Committed { commit, .. } => Some(commit),
        }
    }

    /// contents of the marker at `relative`, or `None` when it does not exist
    pub fn read_marker(&self, relative: &Path) -> Result<Option<MarkerKey>> {
        match self {
            Source::Local { root } => {
                let path = root.join(relative);
                if !path.is_file() {
                    return Ok(None);
                }
                let content = fs::read_to_string(&path).with_path(&path)?;
                MarkerKey::parse(&content).map(Some)
            }
            Source::Committed { vcs, commit } => match vcs.read(relative, commit)? {
                Some(content) => MarkerKey::parse(&content).map(Some),
                None => Ok(None),
            },
        }
    }

    /// entries of the folder at `relative`, sorted by name; a missing folder is empty
    pub fn list_dir(&self, relative: &Path) -> Result<Vec<DirEntry>> {
        let mut entries = match self {
            Source::Local { root } => {
                let dir = root.join(relative);
                let mut entries = Vec::new();
                if !dir.is_dir() {
                    return Ok(entries);
                }
                for entry in fs::read_dir(&dir).with_path(&dir)? {
                    let entry = entry.with_path(&dir)?;
                    let path = entry.path();
                    let file_type = entry.file_type().with_path(&path)?;
                    entries.push(DirEntry {
                        name: entry.file_name().to_string_lossy().into_owned(),
                        // follows symlinks, like the folder walk a user would expect
                        is_dir: path.is_dir(),
                        is_symlink: file_type.is_symlink(),
                    });
                }
                entries
            }
            Source::Committed { vcs, commit } => vcs.list_dir(relative, commit)?,
        };
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// does anything (file, folder, marker) exist at `relative`
    pub fn exists(&self, relative: &Path) -> Result<bool> {
        match self {
            Source::Local { root } => Ok(root.join(relative).exists()),
            Source::Committed { vcs, commit } => {
                let Some(name) = relative.file_name() else {
                    // the repository root always exists
                    return Ok(true);
                };
                let parent = relative.parent().unwrap_or(Path::new(""));
                let name = name.to_string_lossy();
                Ok(vcs
                    .list_dir(parent, commit)?
                    .iter()
                    .any(|entry| entry.name == name))
            }
        }
    }

    /// names present in a listing, for conflict checks
    pub(crate) fn names(entries: &[DirEntry]) -> BTreeSet<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }
}

/// normalize a relative path: drop `.`, resolve `..` without escaping the root
pub(crate) fn clean_relative(path: &Path) -> Option<PathBuf> {
    use std::path::Component;

    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => result.push(part),
            Component::ParentDir => {
                if !result.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(result)
}

/// `/`-joined form of a relative path, as used for tree entry names
pub(crate) fn to_posix(path: &Path) -> String {
    path.iter()
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
