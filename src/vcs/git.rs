//! git accessed through the `git` binary

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{Error, Result};
use crate::vcs::{DirEntry, Vcs};
use crate::version::CommitId;

const SYMLINK_MODE: &str = "120000";

/// git history of the working copy containing `root`
pub struct SubprocessGit {
    root: PathBuf,
    toplevel: OnceLock<PathBuf>,
    reads: Mutex<HashMap<(PathBuf, CommitId), Option<String>>>,
    listings: Mutex<HashMap<(PathBuf, CommitId), Vec<DirEntry>>>,
}

impl SubprocessGit {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            toplevel: OnceLock::new(),
            reads: Mutex::new(HashMap::new()),
            listings: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// repository root as reported by git, resolved once
    fn toplevel(&self) -> Result<&Path> {
        if let Some(path) = self.toplevel.get() {
            return Ok(path);
        }
        let output = self.git(&self.root, &["rev-parse", "--show-toplevel"])?;
        if !output.status.success() {
            return Err(Error::Vcs(format!(
                "{} is not inside a git repository",
                self.root.display()
            )));
        }
        let toplevel = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        Ok(self.toplevel.get_or_init(|| toplevel))
    }

    fn git(&self, cwd: &Path, args: &[&str]) -> Result<Output> {
        trace!(?args, cwd = %cwd.display(), "running git");
        Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|e| Error::Vcs(format!("failed to run git: {}", e)))
    }
}

/// `./relative`, so git reads the path relative to the working directory
fn dot_relative(relative: &Path) -> String {
    let relative = relative.to_string_lossy();
    if relative.is_empty() {
        ".".to_string()
    } else {
        format!("./{}", relative)
    }
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// exit messages git uses when a path is absent from a revision
fn is_missing_path(message: &str) -> bool {
    message.contains("does not exist") || message.contains("exists on disk, but not in")
}

/// parse `git ls-tree -z` output: `<mode> <type> <hash>\t<name>\0`
fn parse_ls_tree(stdout: &[u8]) -> Result<Vec<DirEntry>> {
    let text = String::from_utf8_lossy(stdout);
    let mut entries = Vec::new();
    for record in text.split('\0').filter(|r| !r.is_empty()) {
        let (meta, name) = record
            .split_once('\t')
            .ok_or_else(|| Error::Vcs(format!("malformed ls-tree output: {}", record)))?;
        let mut fields = meta.split(' ');
        let mode = fields.next().unwrap_or_default();
        let kind = fields.next().unwrap_or_default();
        entries.push(DirEntry {
            name: name.to_string(),
            is_dir: kind == "tree",
            is_symlink: mode == SYMLINK_MODE,
        });
    }
    Ok(entries)
}

impl Vcs for SubprocessGit {
    fn read(&self, relative: &Path, version: &CommitId) -> Result<Option<String>> {
        let cache_key = (relative.to_path_buf(), version.clone());
        if let Some(cached) = self.reads.lock().get(&cache_key) {
            return Ok(cached.clone());
        }

        let spec = format!("{}:{}", version, dot_relative(relative));
        let output = self.git(&self.root, &["show", &spec])?;
        let result = if output.status.success() {
            Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let message = stderr(&output);
            if !is_missing_path(&message) {
                return Err(Error::Vcs(message));
            }
            None
        };

        self.reads.lock().insert(cache_key, result.clone());
        Ok(result)
    }

    fn latest_version(&self, relative: &Path, skip: usize) -> Result<Option<CommitId>> {
        let skip = format!("--skip={}", skip);
        let path = dot_relative(relative);
        let output = self.git(
            &self.root,
            &["log", "-n", "1", &skip, "--pretty=format:%H", "--", &path],
        )?;
        if !output.status.success() {
            return Err(Error::Vcs(stderr(&output)));
        }
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!hash.is_empty()).then(|| CommitId::new(hash)))
    }

    fn list_dir(&self, relative: &Path, version: &CommitId) -> Result<Vec<DirEntry>> {
        let cache_key = (relative.to_path_buf(), version.clone());
        if let Some(cached) = self.listings.lock().get(&cache_key) {
            return Ok(cached.clone());
        }

        let toplevel = self.toplevel()?;
        let root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
        let toplevel = toplevel.canonicalize().unwrap_or_else(|_| toplevel.to_path_buf());
        let absolute = root.join(relative);
        let git_relative = absolute.strip_prefix(&toplevel).map_err(|_| {
            Error::Vcs(format!(
                "{} is outside of the git repository {}",
                absolute.display(),
                toplevel.display()
            ))
        })?;

        let git_relative = git_relative.to_string_lossy();
        let spec = if git_relative.is_empty() {
            version.to_string()
        } else {
            format!("{}:{}", version, git_relative)
        };
        let output = self.git(&toplevel, &["ls-tree", "-z", &spec])?;
        let entries = if output.status.success() {
            parse_ls_tree(&output.stdout)?
        } else {
            let message = stderr(&output);
            // 128 with "not a tree object" / "not a valid object name" when the folder is absent
            if output.status.code() != Some(128) {
                return Err(Error::Vcs(message));
            }
            trace!(%spec, %message, "missing folder lists as empty");
            Vec::new()
        };

        self.listings.lock().insert(cache_key, entries.clone());
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn run(cwd: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
            .args(args)
            .current_dir(cwd)
            .output()
            .unwrap()
            .status;
        assert!(status.success(), "git {:?} failed", args);
    }

    #[test]
    fn test_parse_ls_tree() {
        let out = b"100644 blob aaaa\ta.hash\0040000 tree bbbb\tdir\0120000 blob cccc\tlink\0";
        let entries = parse_ls_tree(out).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], DirEntry::file("a.hash"));
        assert_eq!(entries[1], DirEntry::dir("dir"));
        assert!(entries[2].is_symlink && !entries[2].is_dir);
    }

    #[test]
    fn test_dot_relative() {
        assert_eq!(dot_relative(Path::new("")), ".");
        assert_eq!(dot_relative(Path::new("a/b")), "./a/b");
    }

    #[test]
    fn test_subprocess_git_history() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let root = dir.path();
        run(root, &["init", "-q"]);

        fs::create_dir(root.join("data")).unwrap();
        fs::write(root.join("data/a.hash"), "first").unwrap();
        run(root, &["add", "."]);
        run(root, &["commit", "-q", "-m", "one"]);
        run(root, &["tag", "v1"]);

        fs::write(root.join("data/a.hash"), "second").unwrap();
        run(root, &["add", "."]);
        run(root, &["commit", "-q", "-m", "two"]);
        run(root, &["tag", "v2"]);

        let git = SubprocessGit::new(root);
        let v1 = CommitId::new("v1");
        let v2 = CommitId::new("v2");

        assert_eq!(
            git.read(Path::new("data/a.hash"), &v1).unwrap().as_deref(),
            Some("first")
        );
        assert_eq!(
            git.read(Path::new("data/a.hash"), &v2).unwrap().as_deref(),
            Some("second")
        );
        assert_eq!(git.read(Path::new("data/missing.hash"), &v2).unwrap(), None);

        assert_eq!(git.list_dir(Path::new(""), &v1).unwrap(), vec![DirEntry::dir("data")]);
        assert_eq!(
            git.list_dir(Path::new("data"), &v1).unwrap(),
            vec![DirEntry::file("a.hash")]
        );
        assert!(git.list_dir(Path::new("nothing"), &v1).unwrap().is_empty());

        let newest = git.latest_version(Path::new("data/a.hash"), 0).unwrap().unwrap();
        let older = git.latest_version(Path::new("data/a.hash"), 1).unwrap().unwrap();
        assert_ne!(newest, older);
        assert!(git.latest_version(Path::new("data/a.hash"), 2).unwrap().is_none());
        assert!(git.latest_version(Path::new("nothing"), 0).unwrap().is_none());
    }
}
