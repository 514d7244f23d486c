use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::hash::{is_marker, load_marker, to_marker, Key, MarkerKey};
use crate::ops::read_tree;
use crate::storage::Storage;

/// make every key referenced by the given markers available locally
///
/// a folder stands for every marker below it and a missing plain path for its
/// marker. returns the number of keys now available.
pub fn fetch(storage: &dyn Storage, paths: &[PathBuf]) -> Result<usize> {
    let mut keys = BTreeSet::new();
    for marker in collect_markers(paths)? {
        match load_marker(&marker)? {
            MarkerKey::File(key) => {
                keys.insert(key);
            }
            MarkerKey::Tree(key) => {
                let tree = read_tree(storage, &key, true)?;
                keys.extend(tree.keys().cloned());
            }
        }
    }

    let requested: Vec<Key> = keys.into_iter().collect();
    let available = storage.fetch(&requested)?;
    let missing = requested.iter().filter(|k| !available.contains(*k)).count();
    if missing > 0 {
        return Err(Error::KeysNotFetched(missing));
    }
    info!(keys = requested.len(), "fetched");
    Ok(requested.len())
}

fn collect_markers(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut markers = Vec::new();
    for path in paths {
        if is_marker(path) {
            if !path.is_file() {
                return Err(Error::SourceNotFound(path.clone()));
            }
            markers.push(path.clone());
        } else if path.is_dir() {
            markers.extend(markers_below(path)?);
        } else if path.exists() {
            warn!(path = %path.display(), "not a hash, nothing to fetch");
        } else {
            let marker = to_marker(path)?;
            if !marker.is_file() {
                return Err(Error::SourceNotFound(path.clone()));
            }
            markers.push(marker);
        }
    }
    Ok(markers)
}

pub(crate) fn markers_below(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut markers = Vec::new();
    for entry in WalkDir::new(folder).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io {
            path: folder.to_path_buf(),
            source: e.into(),
        })?;
        if entry.file_type().is_file() && is_marker(entry.path()) {
            markers.push(entry.into_path());
        }
    }
    Ok(markers)
}
