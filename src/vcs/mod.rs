//! read-only access to the version-control history

mod git;
mod memory;

use std::path::Path;

use crate::error::Result;
use crate::version::CommitId;

pub use git::SubprocessGit;
pub use memory::MemoryVcs;

/// one entry of a historical folder listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub is_symlink: bool,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            is_symlink: false,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            is_symlink: false,
        }
    }
}

/// history oracle; paths are relative to the repository root
///
/// reading something that does not exist yields `None` (or an empty listing),
/// never an error. errors are reserved for backend failures.
pub trait Vcs: Send + Sync {
    /// contents of a file at `version`
    fn read(&self, relative: &Path, version: &CommitId) -> Result<Option<String>>;

    /// the `skip`-th most recent commit touching `relative`, newest first
    fn latest_version(&self, relative: &Path, skip: usize) -> Result<Option<CommitId>>;

    /// contents of a folder at `version`
    fn list_dir(&self, relative: &Path, version: &CommitId) -> Result<Vec<DirEntry>>;
}
