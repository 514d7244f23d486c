//! workflows built on markers and storage

mod add;
mod blame;
mod fetch;
mod gather;
mod marker;
mod merge;
mod pull;

pub use add::{add, AddOptions};
pub use blame::blame;
pub use fetch::fetch;
pub use gather::gather;
pub use marker::{load_hash, read_tree, save_hash, tree_to_hash};
pub use merge::{merge_hash, ConflictResolution, HashValue};
pub use pull::{pull, PullMode, PullOptions};
