use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Algorithm;

/// name of the file marking a repository root
pub const CONFIG_FILE: &str = ".hashmark.toml";

/// repository configuration stored in `.hashmark.toml`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    /// read-only mirrors consulted by fetch, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<Remote>,
}

/// where blobs live and how they are keyed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// relative paths resolve against the repository root
    pub root: PathBuf,
    #[serde(default)]
    pub algorithm: Algorithm,
}

impl Config {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                root: storage_root.into(),
                algorithm: Algorithm::default(),
            },
            remotes: vec![],
        }
    }

    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }

    /// add a remote
    pub fn add_remote(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Result<()> {
        let name = name.into();
        if self.get_remote(&name).is_some() {
            return Err(Error::RemoteExists(name));
        }
        self.remotes.push(Remote {
            name,
            path: path.into(),
        });
        Ok(())
    }

    /// remove a remote
    pub fn remove_remote(&mut self, name: &str) -> Result<()> {
        let pos = self
            .remotes
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| Error::RemoteNotFound(name.to_string()))?;
        self.remotes.remove(pos);
        Ok(())
    }

    /// get remote by name
    pub fn get_remote(&self, name: &str) -> Option<&Remote> {
        self.remotes.iter().find(|r| r.name == name)
    }

    /// storage root, resolved against the repository root
    pub fn storage_root(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.storage.root)
    }

    /// remote paths, resolved against the repository root
    pub fn remote_paths(&self, repo_root: &Path) -> Vec<PathBuf> {
        self.remotes.iter().map(|r| repo_root.join(&r.path)).collect()
    }
}

/// a read-only storage mirror
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub path: PathBuf,
}

impl Remote {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// nearest ancestor of `start` (inclusive) holding a config file
pub fn find_repo_root(start: &Path) -> Result<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(CONFIG_FILE).is_file())
        .map(Path::to_path_buf)
        .ok_or_else(|| Error::NoRepo(start.to_path_buf()))
}
