mod tree;

pub use tree::{RawEntry, RawTree, Tree, TreeNode};
