pub mod hierarchy;
pub mod linking;
pub mod traversal;

pub use hierarchy::*;
pub use linking::*;
pub use traversal::{
    ancestor_ids, descendant_ids, find_top_ancestor, subtree_ids, TraversalLimits,
};
