use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info, warn};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{from_marker, is_marker, save_marker, to_marker, Key, MarkerKey};
use crate::ops::fetch::markers_below;
use crate::ops::{load_hash, HashValue};
use crate::storage::Storage;
use crate::version::to_posix;

/// how pulled content lands in the working copy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PullMode {
    /// one file marker per tree entry
    #[default]
    Hash,
    /// real copies of the stored bytes
    Copy,
}

impl FromStr for PullMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hash" => Ok(PullMode::Hash),
            "copy" => Ok(PullMode::Copy),
            other => Err(Error::InvalidPullMode(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PullOptions {
    pub mode: PullMode,
    /// leave the source marker in place
    pub keep: bool,
    pub fetch: bool,
}

/// one file the pull will produce
struct Planned {
    target: PathBuf,
    key: Key,
}

/// restore hashed content from markers
///
/// a folder source pulls every marker below it. with several sources the
/// destination is a folder receiving each under its own name.
/// returns the paths written.
pub fn pull(
    storage: &dyn Storage,
    sources: &[PathBuf],
    destination: Option<&Path>,
    opts: PullOptions,
) -> Result<Vec<PathBuf>> {
    if sources.len() > 1 {
        if let Some(dest) = destination.filter(|d| d.exists() && !d.is_dir()) {
            return Err(Error::InvalidDestination(format!(
                "\"{}\" must be a folder when pulling several sources",
                dest.display()
            )));
        }
    }

    let mut written = Vec::new();
    for (marker, target) in resolve_sources(sources, destination)? {
        let value = load_hash(&marker, storage, opts.fetch)?;
        let plan = plan(&value, &target, opts.mode)?;
        if plan.is_empty() && matches!(value, HashValue::File(_)) {
            warn!(marker = %marker.display(), "already a hash, nothing to pull");
            continue;
        }
        if let Some(existing) = plan.iter().find(|p| p.target.exists()) {
            return Err(Error::DestinationExists(existing.target.clone()));
        }

        for item in &plan {
            materialize(storage, item, opts.mode, opts.fetch)?;
            written.push(item.target.clone());
        }
        if !opts.keep {
            fs::remove_file(&marker).with_path(&marker)?;
        }
        info!(marker = %marker.display(), files = plan.len(), "pulled");
    }
    Ok(written)
}

/// pair every marker to pull with where its content goes
///
/// a folder stands for every marker below it, keeping their relative layout.
fn resolve_sources(sources: &[PathBuf], destination: Option<&Path>) -> Result<Vec<(PathBuf, PathBuf)>> {
    let several = sources.len() > 1;
    let mut pairs = Vec::new();
    for source in sources {
        if source.is_dir() {
            let base = target_for(source, source, several, destination)?;
            for marker in markers_below(source)? {
                let inner = from_marker(marker.strip_prefix(source).unwrap_or(&marker))?;
                pairs.push((marker, base.join(inner)));
            }
            continue;
        }

        let marker = if is_marker(source) {
            source.clone()
        } else {
            to_marker(source)?
        };
        if !marker.is_file() {
            return Err(Error::SourceNotFound(source.clone()));
        }
        let logical = from_marker(&marker)?;
        let target = target_for(source, &logical, several, destination)?;
        pairs.push((marker, target));
    }
    Ok(pairs)
}

fn target_for(
    source: &Path,
    logical: &Path,
    several: bool,
    destination: Option<&Path>,
) -> Result<PathBuf> {
    match destination {
        Some(dest) if several => logical
            .file_name()
            .map(|name| dest.join(name))
            .ok_or_else(|| Error::SourceNotFound(source.to_path_buf())),
        Some(dest) => Ok(dest.to_path_buf()),
        None => Ok(logical.to_path_buf()),
    }
}

fn plan(value: &HashValue, target: &Path, mode: PullMode) -> Result<Vec<Planned>> {
    match value {
        HashValue::Tree(tree) => {
            if target.is_file() {
                return Err(Error::InvalidDestination(format!(
                    "\"{}\" is a file but the hash is a folder",
                    target.display()
                )));
            }
            tree.iter()
                .map(|(path, key)| {
                    let file = target.join(path);
                    let target = match mode {
                        PullMode::Hash => to_marker(&file)?,
                        PullMode::Copy => file,
                    };
                    Ok(Planned {
                        target,
                        key: key.clone(),
                    })
                })
                .collect()
        }
        HashValue::File(key) => {
            if target.is_dir() {
                return Err(Error::InvalidDestination(format!(
                    "\"{}\" is a folder but the hash is a file",
                    target.display()
                )));
            }
            let target = match mode {
                PullMode::Copy => target.to_path_buf(),
                // a file marker is already its own pulled form
                PullMode::Hash => return Ok(Vec::new()),
            };
            Ok(vec![Planned {
                target,
                key: key.clone(),
            }])
        }
    }
}

fn materialize(storage: &dyn Storage, item: &Planned, mode: PullMode, fetch: bool) -> Result<()> {
    if let Some(parent) = item.target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_path(parent)?;
    }
    match mode {
        PullMode::Hash => save_marker(&item.target, &MarkerKey::File(item.key.clone())),
        PullMode::Copy => {
            let object = storage.locate(&item.key, fetch)?;
            fs::copy(&object, &item.target).with_path(&item.target)?;
            // stored objects are read-only, the working copy is not
            fs::set_permissions(&item.target, Permissions::from_mode(0o644))
                .with_path(&item.target)?;
            debug!(path = %to_posix(&item.target), key = %item.key, "copied");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{load_marker, Algorithm};
    use crate::ops::save_hash;
    use crate::storage::LocalStorage;
    use crate::types::Tree;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, LocalStorage, PathBuf) {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("storage"), Algorithm::Sha256);
        let a = storage.write_bytes(b"a").unwrap();
        let b = storage.write_bytes(b"b").unwrap();
        let tree = Tree::from_entries(vec![("a.txt", a.as_str()), ("sub/b.txt", b.as_str())], 32)
            .unwrap();
        let marker = dir.path().join("data.hash");
        save_hash(&HashValue::Tree(tree), &marker, &storage).unwrap();
        (dir, storage, marker)
    }

    #[test]
    fn test_pull_tree_as_markers() {
        let (dir, storage, marker) = setup();
        let written = pull(&storage, &[marker.clone()], None, PullOptions::default()).unwrap();

        assert_eq!(
            written,
            vec![
                dir.path().join("data/a.txt.hash"),
                dir.path().join("data/sub/b.txt.hash")
            ]
        );
        assert_eq!(
            load_marker(&dir.path().join("data/a.txt.hash")).unwrap(),
            MarkerKey::File(Algorithm::Sha256.digest(b"a"))
        );
        assert!(!marker.exists());
    }

    #[test]
    fn test_pull_tree_as_copies() {
        let (dir, storage, marker) = setup();
        let opts = PullOptions {
            mode: PullMode::Copy,
            keep: true,
            ..Default::default()
        };
        let dest = dir.path().join("restored");
        pull(&storage, &[dir.path().join("data")], Some(&dest), opts).unwrap();

        assert_eq!(fs::read(dest.join("sub/b.txt")).unwrap(), b"b");
        // the copy is writable even though the object is not
        fs::write(dest.join("a.txt"), b"edited").unwrap();
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"edited");
        assert!(marker.exists());
    }

    #[test]
    fn test_pull_file_copy() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("storage"), Algorithm::Sha256);
        let key = storage.write_bytes(b"content").unwrap();
        let marker = dir.path().join("f.bin.hash");
        save_marker(&marker, &MarkerKey::File(key)).unwrap();

        // a file marker pulled as hashes is left alone
        assert!(pull(&storage, &[marker.clone()], None, PullOptions::default())
            .unwrap()
            .is_empty());
        assert!(marker.exists());

        let opts = PullOptions {
            mode: PullMode::Copy,
            ..Default::default()
        };
        pull(&storage, &[marker.clone()], None, opts).unwrap();
        assert_eq!(fs::read(dir.path().join("f.bin")).unwrap(), b"content");
        assert!(!marker.exists());
    }

    #[test]
    fn test_pull_destination_errors() {
        let (dir, storage, marker) = setup();
        let file = dir.path().join("plain");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            pull(&storage, &[marker.clone()], Some(&file), PullOptions::default()),
            Err(Error::InvalidDestination(_))
        ));

        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(dir.path().join("data/a.txt.hash"), "taken").unwrap();
        assert!(matches!(
            pull(&storage, &[marker.clone()], None, PullOptions::default()),
            Err(Error::DestinationExists(_))
        ));
        // nothing was written and the marker survives
        assert!(!dir.path().join("data/sub").exists());
        assert!(marker.exists());
    }

    #[test]
    fn test_pull_several_sources() {
        let (dir, storage, marker) = setup();
        let key = storage.write_bytes(b"single").unwrap();
        let single = dir.path().join("one.bin.hash");
        save_marker(&single, &MarkerKey::File(key)).unwrap();

        let out = dir.path().join("out");
        let opts = PullOptions {
            mode: PullMode::Copy,
            ..Default::default()
        };
        pull(&storage, &[marker, single], Some(&out), opts).unwrap();
        assert_eq!(fs::read(out.join("data/a.txt")).unwrap(), b"a");
        assert_eq!(fs::read(out.join("one.bin")).unwrap(), b"single");
    }

    #[test]
    fn test_pull_folder_of_markers() {
        let (dir, storage, _) = setup();
        let folder = dir.path().join("work");
        fs::create_dir_all(folder.join("nested")).unwrap();
        let key = storage.write_bytes(b"single").unwrap();
        save_marker(&folder.join("one.bin.hash"), &MarkerKey::File(key)).unwrap();
        fs::rename(dir.path().join("data.hash"), folder.join("nested/data.hash")).unwrap();

        let opts = PullOptions {
            mode: PullMode::Copy,
            ..Default::default()
        };
        pull(&storage, &[folder.clone()], None, opts.clone()).unwrap();
        assert_eq!(fs::read(folder.join("one.bin")).unwrap(), b"single");
        assert_eq!(fs::read(folder.join("nested/data/sub/b.txt")).unwrap(), b"b");
        assert!(!folder.join("one.bin.hash").exists());
        assert!(!folder.join("nested/data.hash").exists());

        // a folder with nothing hashed inside is not an error
        assert!(pull(&storage, &[folder.join("nested/data")], None, opts)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_pull_folder_into_destination() {
        let (dir, storage, _) = setup();
        let folder = dir.path().join("work");
        fs::create_dir(&folder).unwrap();
        fs::rename(dir.path().join("data.hash"), folder.join("data.hash")).unwrap();

        let out = dir.path().join("out");
        let opts = PullOptions {
            mode: PullMode::Copy,
            keep: true,
            ..Default::default()
        };
        pull(&storage, &[folder.clone()], Some(&out), opts).unwrap();
        assert_eq!(fs::read(out.join("data/a.txt")).unwrap(), b"a");
        assert!(folder.join("data.hash").exists());
    }

    #[test]
    fn test_pull_mode_parse() {
        assert_eq!("copy".parse::<PullMode>().unwrap(), PullMode::Copy);
        assert!("move".parse::<PullMode>().is_err());
    }
}
