use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{is_marker, load_marker, to_marker, MarkerKey};
use crate::ops::{gather, load_hash, merge_hash, save_hash, ConflictResolution};
use crate::storage::Storage;

/// add options
#[derive(Clone, Debug, Default)]
pub struct AddOptions {
    /// leave the source in place
    pub keep: bool,
    /// how to combine with an existing destination marker
    pub on_conflict: ConflictResolution,
    /// fetch missing objects referenced by markers inside the source
    pub fetch: bool,
}

/// hash a file or folder into a marker, storing its content
///
/// the marker defaults to `<source>.hash`. returns the stored key and the marker path.
pub fn add(
    storage: &dyn Storage,
    source: &Path,
    destination: Option<&Path>,
    opts: AddOptions,
) -> Result<(MarkerKey, PathBuf)> {
    if !source.exists() {
        return Err(Error::SourceNotFound(source.to_path_buf()));
    }
    let marker = match destination {
        Some(dest) if is_marker(dest) => dest.to_path_buf(),
        Some(dest) => to_marker(dest)?,
        None if is_marker(source) => source.to_path_buf(),
        None => to_marker(source)?,
    };
    if marker == source {
        warn!(marker = %marker.display(), "already a hash, nothing to add");
        return Ok((load_marker(&marker)?, marker));
    }

    let exists = marker.exists();
    if exists && opts.on_conflict == ConflictResolution::Error {
        return Err(Error::DestinationExists(marker));
    }

    let current = gather(source, storage, opts.fetch)?;
    let previous = match (exists, opts.on_conflict) {
        (true, ConflictResolution::Override | ConflictResolution::Update) => {
            Some(load_hash(&marker, storage, opts.fetch)?)
        }
        _ => None,
    };
    let merged = merge_hash(previous.as_ref(), current, opts.on_conflict)?;

    if let Some(parent) = marker.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_path(parent)?;
    }
    let key = save_hash(&merged, &marker, storage)?;

    if !opts.keep {
        debug!(source = %source.display(), "removing source");
        if source.is_dir() {
            fs::remove_dir_all(source).with_path(source)?;
        } else {
            fs::remove_file(source).with_path(source)?;
        }
    }
    info!(marker = %marker.display(), %key, "added");
    Ok((key, marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Algorithm;
    use crate::ops::HashValue;
    use crate::storage::LocalStorage;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("storage"), Algorithm::Sha256);
        (dir, storage)
    }

    #[test]
    fn test_add_file() {
        let (dir, storage) = setup();
        let file = dir.path().join("model.bin");
        fs::write(&file, b"weights").unwrap();

        let (key, marker) = add(&storage, &file, None, AddOptions::default()).unwrap();
        assert_eq!(marker, dir.path().join("model.bin.hash"));
        assert_eq!(key, MarkerKey::File(Algorithm::Sha256.digest(b"weights")));
        assert!(!file.exists());
        assert_eq!(load_marker(&marker).unwrap(), key);
    }

    #[test]
    fn test_add_folder_keep() {
        let (dir, storage) = setup();
        let folder = dir.path().join("images");
        fs::create_dir(&folder).unwrap();
        fs::write(folder.join("a.png"), b"a").unwrap();

        let opts = AddOptions {
            keep: true,
            ..Default::default()
        };
        let (key, marker) = add(&storage, &folder, None, opts).unwrap();
        assert!(key.is_tree());
        assert!(folder.join("a.png").exists());

        let HashValue::Tree(tree) = load_hash(&marker, &storage, false).unwrap() else {
            panic!("expected a tree");
        };
        assert!(tree.contains("a.png"));
    }

    #[test]
    fn test_add_existing_destination() {
        let (dir, storage) = setup();
        let folder = dir.path().join("images");
        fs::create_dir(&folder).unwrap();
        fs::write(folder.join("a.png"), b"a").unwrap();
        let keep = AddOptions {
            keep: true,
            ..Default::default()
        };
        add(&storage, &folder, None, keep.clone()).unwrap();

        // default policy refuses before touching anything
        assert!(matches!(
            add(&storage, &folder, None, keep.clone()),
            Err(Error::DestinationExists(_))
        ));

        // a second file merged into the same marker
        fs::remove_file(folder.join("a.png")).unwrap();
        fs::write(folder.join("b.png"), b"b").unwrap();
        let update = AddOptions {
            on_conflict: ConflictResolution::Update,
            ..keep
        };
        let (_, marker) = add(&storage, &folder, None, update).unwrap();
        let HashValue::Tree(tree) = load_hash(&marker, &storage, false).unwrap() else {
            panic!("expected a tree");
        };
        assert!(tree.contains("a.png") && tree.contains("b.png"));
    }

    #[test]
    fn test_add_update_conflict() {
        let (dir, storage) = setup();
        let file = dir.path().join("f.txt");
        fs::write(&file, b"one").unwrap();
        add(&storage, &file, None, AddOptions::default()).unwrap();

        fs::write(&file, b"two").unwrap();
        let update = AddOptions {
            on_conflict: ConflictResolution::Update,
            ..Default::default()
        };
        assert!(matches!(
            add(&storage, &file, None, update),
            Err(Error::KeyMergeConflict { .. })
        ));
        // the failed add leaves the source alone
        assert!(file.exists());
    }

    #[test]
    fn test_add_explicit_destination() {
        let (dir, storage) = setup();
        let file = dir.path().join("f.txt");
        fs::write(&file, b"x").unwrap();

        let (_, marker) = add(
            &storage,
            &file,
            Some(&dir.path().join("elsewhere/copy")),
            AddOptions::default(),
        )
        .unwrap();
        assert_eq!(marker, dir.path().join("elsewhere/copy.hash"));
        assert!(marker.is_file());
    }

    #[test]
    fn test_add_marker_onto_itself() {
        let (dir, storage) = setup();
        let file = dir.path().join("f.txt");
        fs::write(&file, b"x").unwrap();
        let (key, marker) = add(&storage, &file, None, AddOptions::default()).unwrap();

        let again = add(&storage, &marker, None, AddOptions::default()).unwrap();
        assert_eq!(again, (key.clone(), marker.clone()));
        let same = add(&storage, &marker, Some(&marker), AddOptions::default()).unwrap();
        assert_eq!(same.0, key);
        // the marker is left in place
        assert_eq!(load_marker(&marker).unwrap(), key);
    }

    #[test]
    fn test_add_missing_source() {
        let (dir, storage) = setup();
        assert!(matches!(
            add(&storage, &dir.path().join("nope"), None, AddOptions::default()),
            Err(Error::SourceNotFound(_))
        ));
    }
}
