use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::Key;

/// a possibly nested mapping as found in a serialized tree or built by callers
pub type RawTree = BTreeMap<String, RawEntry>;

/// one value of a [`RawTree`]: a hex digest or a nested folder
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawEntry {
    Key(String),
    Folder(RawTree),
}

/// a flattened folder hash: relative `/`-separated paths mapped to file keys
///
/// entries are kept sorted, so the serialized form of equal trees is byte-identical.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Tree {
    entries: BTreeMap<String, Key>,
}

impl Tree {
    /// create an empty tree
    pub fn empty() -> Self {
        Self::default()
    }

    /// flatten and validate a nested mapping
    ///
    /// every leaf must be a hex digest of exactly `2 * digest_size` chars, and the same
    /// flattened path may not be given two different keys.
    pub fn normalize(raw: &RawTree, digest_size: usize) -> Result<Self> {
        let mut flat = Vec::new();
        flatten(raw, "", &mut flat);
        Self::from_entries(flat, digest_size)
    }

    /// build from already flat `(path, key)` pairs, applying the same validation as `normalize`
    pub fn from_entries<I, P, K>(entries: I, digest_size: usize) -> Result<Self>
    where
        I: IntoIterator<Item = (P, K)>,
        P: AsRef<str>,
        K: AsRef<str>,
    {
        let mut result: BTreeMap<String, Key> = BTreeMap::new();
        for (path, value) in entries {
            let path = normalize_path(path.as_ref())?;
            let value = value.as_ref();
            if value.len() != digest_size * 2 {
                return Err(Error::InvalidTree(format!(
                    "the entry \"{}\" has a key of length {}, expected {}",
                    path,
                    value.len(),
                    digest_size * 2
                )));
            }
            let key = Key::from_hex(value)?;

            match result.get(&path) {
                Some(existing) if *existing != key => return Err(Error::TreeCollision(path)),
                Some(_) => {}
                None => {
                    result.insert(path, key);
                }
            }
        }

        let tree = Self { entries: result };
        tree.check_layout()?;
        Ok(tree)
    }

    /// fail if some path is both a file and a folder of another entry
    pub fn check_layout(&self) -> Result<()> {
        match self.folders().into_iter().find(|f| self.entries.contains_key(f)) {
            Some(path) => Err(Error::InvalidTree(format!(
                "\"{}\" is both a file and a folder",
                path
            ))),
            None => Ok(()),
        }
    }

    /// canonical serialization: a json object with sorted keys
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.entries)?)
    }

    /// parse and validate a serialized tree
    pub fn decode(bytes: &[u8], digest_size: usize) -> Result<Self> {
        let raw: RawTree = serde_json::from_slice(bytes)?;
        Self::normalize(&raw, digest_size)
    }

    /// look up a file key by relative path
    pub fn get(&self, path: &str) -> Option<&Key> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// insert or replace an entry, returning the previous key
    pub fn insert(&mut self, path: impl Into<String>, key: Key) -> Option<Key> {
        self.entries.insert(path.into(), key)
    }

    /// iterate entries in path order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Key)> {
        self.entries.iter()
    }

    /// iterate every key referenced by the tree
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// every intermediate folder implied by the entries (strict prefixes only)
    pub fn folders(&self) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        for path in self.entries.keys() {
            let mut end = 0;
            while let Some(pos) = path[end..].find('/') {
                end += pos;
                result.insert(path[..end].to_string());
                end += 1;
            }
        }
        result
    }

    /// nested view: folder names map to subfolders, file names to keys
    pub fn to_nested(&self) -> BTreeMap<String, TreeNode> {
        let mut root = BTreeMap::new();
        for (path, key) in &self.entries {
            let parts: Vec<&str> = path.split('/').collect();
            insert_nested(&mut root, &parts, key);
        }
        root
    }
}

impl IntoIterator for Tree {
    type Item = (String, Key);
    type IntoIter = std::collections::btree_map::IntoIter<String, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Tree {
    type Item = (&'a String, &'a Key);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// node of the nested view of a tree
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeNode {
    File(Key),
    Folder(BTreeMap<String, TreeNode>),
}

impl TreeNode {
    pub fn is_folder(&self) -> bool {
        matches!(self, TreeNode::Folder(_))
    }
}

fn insert_nested(node: &mut BTreeMap<String, TreeNode>, parts: &[&str], key: &Key) {
    match parts {
        [] => {}
        [name] => {
            node.insert(name.to_string(), TreeNode::File(key.clone()));
        }
        [folder, rest @ ..] => {
            let child = node
                .entry(folder.to_string())
                .or_insert_with(|| TreeNode::Folder(BTreeMap::new()));
            // from_entries rejects paths that are both a file and a folder
            if let TreeNode::Folder(children) = child {
                insert_nested(children, rest, key);
            }
        }
    }
}

fn flatten(raw: &RawTree, prefix: &str, out: &mut Vec<(String, String)>) {
    for (name, value) in raw {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", prefix, name)
        };
        match value {
            RawEntry::Key(key) => out.push((path, key.clone())),
            RawEntry::Folder(children) => flatten(children, &path, out),
        }
    }
}

/// `./a//b` -> `a/b`; rejects absolute paths and `..`
fn normalize_path(path: &str) -> Result<String> {
    if path.starts_with('/') {
        return Err(Error::InvalidTree(format!("absolute path: {}", path)));
    }
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(Error::InvalidTree(format!(
                    "path contains '..': {}",
                    path
                )))
            }
            _ => parts.push(part),
        }
    }
    if parts.is_empty() {
        return Err(Error::InvalidTree(format!("empty path: \"{}\"", path)));
    }
    Ok(parts.join("/"))
}
