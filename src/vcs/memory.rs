use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};
use crate::vcs::{DirEntry, Vcs};
use crate::version::CommitId;

type Snapshot = BTreeMap<PathBuf, String>;

/// in-process history: an ordered list of full snapshots, oldest first
#[derive(Clone, Debug, Default)]
pub struct MemoryVcs {
    commits: Vec<(CommitId, Snapshot)>,
}

impl MemoryVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// record a snapshot containing exactly `files`
    pub fn commit<I, P, C>(&mut self, id: impl Into<String>, files: I) -> CommitId
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<PathBuf>,
        C: Into<String>,
    {
        let id = CommitId::new(id);
        let snapshot = files
            .into_iter()
            .map(|(path, content)| (path.into(), content.into()))
            .collect();
        self.commits.push((id.clone(), snapshot));
        id
    }

    /// record a snapshot of every file under `root`, skipping hidden entries
    pub fn commit_dir(&mut self, id: impl Into<String>, root: &Path) -> Result<CommitId> {
        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'));
        for entry in walker {
            let entry = entry.map_err(|e| Error::Io {
                path: root.to_path_buf(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let content = fs::read_to_string(path).with_path(path)?;
            let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
            files.push((relative, content));
        }
        Ok(self.commit(id, files))
    }

    fn snapshot(&self, version: &CommitId) -> Result<&Snapshot> {
        self.commits
            .iter()
            .rev()
            .find(|(id, _)| id == version)
            .map(|(_, snapshot)| snapshot)
            .ok_or_else(|| Error::Vcs(format!("unknown revision: {}", version)))
    }
}

/// the part of a snapshot at or below `relative`
fn scope<'a>(snapshot: &'a Snapshot, relative: &Path) -> Vec<(&'a PathBuf, &'a String)> {
    snapshot
        .iter()
        .filter(|(path, _)| path.starts_with(relative))
        .collect()
}

impl Vcs for MemoryVcs {
    fn read(&self, relative: &Path, version: &CommitId) -> Result<Option<String>> {
        Ok(self.snapshot(version)?.get(relative).cloned())
    }

    fn latest_version(&self, relative: &Path, skip: usize) -> Result<Option<CommitId>> {
        let mut touching = Vec::new();
        for (i, (id, snapshot)) in self.commits.iter().enumerate() {
            let current = scope(snapshot, relative);
            let touched = match i {
                0 => !current.is_empty(),
                _ => current != scope(&self.commits[i - 1].1, relative),
            };
            if touched {
                touching.push(id.clone());
            }
        }
        Ok(touching.into_iter().rev().nth(skip))
    }

    fn list_dir(&self, relative: &Path, version: &CommitId) -> Result<Vec<DirEntry>> {
        let mut children: BTreeMap<String, bool> = BTreeMap::new();
        for path in self.snapshot(version)?.keys() {
            let Ok(rest) = path.strip_prefix(relative) else {
                continue;
            };
            let mut components = rest.components();
            let Some(first) = components.next() else {
                continue;
            };
            let is_dir = components.next().is_some();
            let name = first.as_os_str().to_string_lossy().into_owned();
            *children.entry(name).or_insert(false) |= is_dir;
        }
        Ok(children
            .into_iter()
            .map(|(name, is_dir)| DirEntry {
                name,
                is_dir,
                is_symlink: false,
            })
            .collect())
    }
}
