use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::hash::Key;
use crate::types::Tree;

/// what to do when a destination marker already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConflictResolution {
    /// refuse if there is any previous version
    #[default]
    Error,
    /// drop the previous version
    Replace,
    /// union, the new entry wins on collision
    Override,
    /// union, colliding entries must be equal
    Update,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictResolution::Error => "error",
            ConflictResolution::Replace => "replace",
            ConflictResolution::Override => "override",
            ConflictResolution::Update => "update",
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictResolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "error" => Ok(ConflictResolution::Error),
            "replace" => Ok(ConflictResolution::Replace),
            "override" => Ok(ConflictResolution::Override),
            "update" => Ok(ConflictResolution::Update),
            other => Err(Error::InvalidConflictResolution(other.to_string())),
        }
    }
}

/// the value behind a marker: one file key or a whole folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashValue {
    File(Key),
    Tree(Tree),
}

impl HashValue {
    pub fn is_tree(&self) -> bool {
        matches!(self, HashValue::Tree(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            HashValue::File(_) => "file",
            HashValue::Tree(_) => "folder",
        }
    }
}

/// combine a freshly computed value with the one already stored at a destination
///
/// the previous value is never modified; the caller persists the result.
pub fn merge_hash(
    previous: Option<&HashValue>,
    current: HashValue,
    policy: ConflictResolution,
) -> Result<HashValue> {
    let Some(previous) = previous else {
        return Ok(current);
    };

    match policy {
        ConflictResolution::Error => Err(Error::MergeRefused),
        ConflictResolution::Replace => Ok(current),
        ConflictResolution::Override | ConflictResolution::Update => {
            let update = policy == ConflictResolution::Update;
            match (previous, current) {
                (HashValue::Tree(previous), HashValue::Tree(current)) => {
                    merge_trees(previous, current, update).map(HashValue::Tree)
                }
                (HashValue::File(previous), HashValue::File(current)) => {
                    if update && *previous != current {
                        return Err(Error::KeyMergeConflict {
                            current: current.short().to_string(),
                            previous: previous.short().to_string(),
                        });
                    }
                    Ok(HashValue::File(current))
                }
                (_, current) => Err(Error::MergeKindMismatch {
                    expected: current.kind(),
                }),
            }
        }
    }
}

fn merge_trees(previous: &Tree, current: Tree, update: bool) -> Result<Tree> {
    let mut merged = previous.clone();
    for (path, key) in current {
        if update {
            if let Some(old) = previous.get(&path) {
                if *old != key {
                    return Err(Error::TreeMergeConflict {
                        current: key.short().to_string(),
                        previous: old.short().to_string(),
                        path,
                    });
                }
            }
        }
        merged.insert(path, key);
    }
    // a file in one tree may be a folder in the other
    merged.check_layout()?;
    Ok(merged)
}
