//! hashmark - versioned content-addressed path resolution
//!
//! large files live in a content-addressed storage; the repository only tracks small
//! hash markers next to where the data would be. a marker `name.hash` holds either the
//! key of a single file or, prefixed with `T:`, the key of a tree: a flat mapping of
//! relative paths to file keys describing a whole folder.
//!
//! # Core concepts
//!
//! - **Key**: lowercase hex digest of some content
//! - **Marker**: a `*.hash` file standing for the path without the suffix
//! - **Tree**: sorted `path -> key` entries, stored as canonical JSON
//! - **Version**: the working copy (`Local`) or a commit of the surrounding git history
//!
//! # Resolution
//!
//! to resolve `a/b/c`, the ancestors `a` and `a/b` are searched for a marker, shallowest
//! first; a tree marker there answers for everything below it. failing that the path's
//! own marker `a/b/c.hash` is read.
//!
//! # Example usage
//!
//! ```no_run
//! use hashmark::{Repository, ResolveOptions, Version};
//! use std::path::Path;
//!
//! let repo = Repository::discover(Path::new(".")).unwrap();
//!
//! // the key of a file inside a hashed folder, as of some commit
//! let key = repo
//!     .resolve_key("images/cat.png", ResolveOptions::version(Version::committed("v1.0")))
//!     .unwrap();
//!
//! // every png the working copy knows about, hashed or not
//! for path in repo.glob("images/**/*.png", ResolveOptions::local()).unwrap() {
//!     println!("{}", path.display());
//! }
//! # let _ = key;
//! ```

mod config;
mod error;
mod repo;

pub mod cache;
pub mod glob;
pub mod hash;
pub mod ops;
pub mod storage;
pub mod types;
pub mod vcs;
pub mod version;

pub use config::{find_repo_root, Config, Remote, StorageConfig, CONFIG_FILE};
pub use error::{Error, Result};
pub use hash::{Algorithm, Key, MarkerKey};
pub use repo::{Repository, ResolveOptions};
pub use storage::{LocalStorage, Storage};
pub use types::Tree;
pub use vcs::{MemoryVcs, SubprocessGit, Vcs};
pub use version::{CommitId, Version};
