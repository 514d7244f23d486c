use std::path::Path;

use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::hash::{from_marker, is_marker};
use crate::ops::{load_hash, HashValue};
use crate::storage::Storage;
use crate::types::Tree;
use crate::version::to_posix;

/// compute the value a path would be hashed to, storing any plain file met
///
/// a marker yields what it points to. inside a folder, nested markers are
/// inlined under the name they stand for.
pub fn gather(source: &Path, storage: &dyn Storage, fetch: bool) -> Result<HashValue> {
    if is_marker(source) && source.is_file() {
        return load_hash(source, storage, fetch);
    }
    if source.is_file() {
        return Ok(HashValue::File(storage.write(source)?));
    }
    if !source.is_dir() {
        return Err(Error::SourceNotFound(source.to_path_buf()));
    }

    let mut entries: Vec<(String, String)> = Vec::new();
    let walker = WalkDir::new(source)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|e| Error::Io {
            path: source.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(source).unwrap_or(path);
        if !is_marker(relative) {
            trace!(path = %path.display(), "storing file");
            let key = storage.write(path)?;
            entries.push((to_posix(relative), key.to_string()));
            continue;
        }

        let logical = to_posix(&from_marker(relative)?);
        match load_hash(path, storage, fetch)? {
            HashValue::File(key) => entries.push((logical, key.to_string())),
            HashValue::Tree(tree) => {
                for (inner, key) in tree {
                    entries.push((format!("{}/{}", logical, inner), key.to_string()));
                }
            }
        }
    }

    let tree = Tree::from_entries(entries, storage.digest_size())?;
    debug!(source = %source.display(), entries = tree.len(), "gathered folder");
    Ok(HashValue::Tree(tree))
}
