//! Decision trees of the model-definition format.
//!
//! [`TreeNode`] is a single split or leaf; [`Tree`] is the flat node list
//! together with its feature names and target type.

pub mod node;
pub mod tree;

pub use node::{DecisionType, TreeNode};
pub use tree::Tree;
