use std::path::PathBuf;

use crate::hash::Key;

/// error type for hashmark operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("repository not found at {0}")]
    NoRepo(PathBuf),

    #[error("repository already exists at {0}")]
    RepoExists(PathBuf),

    #[error("invalid hash marker: {0}")]
    HashFormat(String),

    #[error("hash not found: {0}")]
    HashNotFound(PathBuf),

    #[error("\"{0}\" is a hashed folder, not a file")]
    HashedFolder(PathBuf),

    #[error("\"{0}\" is a hashed file, not a folder")]
    HashedFile(PathBuf),

    #[error("\"{0}\" is a folder inside a tree hash")]
    FolderInsideTree(PathBuf),

    #[error("object not found in storage: {0}")]
    ObjectNotFound(Key),

    #[error("could not fetch {0} key(s) from remote")]
    KeysNotFetched(usize),

    #[error("the path \"{path}\" has a wrong hash: expected \"{expected}\", actual \"{actual}\"")]
    InconsistentHash {
        path: PathBuf,
        expected: Key,
        actual: Key,
    },

    #[error("both the path \"{path}\" and its hash \"{marker}\" found")]
    NameConflict { path: PathBuf, marker: PathBuf },

    #[error(
        "the current ({current}...) and previous ({previous}...) versions do not match for \"{path}\", \
         which is required for the \"update\" conflict resolution"
    )]
    TreeMergeConflict {
        path: String,
        current: String,
        previous: String,
    },

    #[error(
        "the current ({current}...) and previous ({previous}...) versions do not match, \
         which is required for the \"update\" conflict resolution"
    )]
    KeyMergeConflict { current: String, previous: String },

    #[error("a previous version exists and the conflict resolution is \"error\"")]
    MergeRefused,

    #[error("the previous version is not a {expected}")]
    MergeKindMismatch { expected: &'static str },

    #[error("the destination \"{0}\" already exists and no conflict resolution provided")]
    DestinationExists(PathBuf),

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("source not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("invalid tree: {0}")]
    InvalidTree(String),

    #[error("tree entry collision at \"{0}\"")]
    TreeCollision(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("the data version must be provided")]
    MissingVersion,

    #[error("only relative paths are supported: {0}")]
    AbsolutePath(PathBuf),

    #[error("the path \"{0}\" is not present in any commit")]
    NoHistory(PathBuf),

    #[error("invalid glob pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid conflict resolution strategy: {0}")]
    InvalidConflictResolution(String),

    #[error("invalid pull mode: {0}")]
    InvalidPullMode(String),

    #[error("version control error: {0}")]
    Vcs(String),

    #[error("remote already exists: {0}")]
    RemoteExists(String),

    #[error("remote not found: {0}")]
    RemoteNotFound(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tree serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// whether this error means "nothing resolvable at this path"
    ///
    /// `FolderInsideTree` is deliberately left out: the path exists, it is just a folder.
    pub fn is_hash_not_found(&self) -> bool {
        matches!(
            self,
            Error::HashNotFound(_)
                | Error::HashedFolder(_)
                | Error::ObjectNotFound(_)
                | Error::KeysNotFetched(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
