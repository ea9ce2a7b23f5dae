//! Decision tree of a model definition.
//!
//! Nodes are stored in a flat vector indexed by `node_index`; node 0 is the
//! root. Feature vectors handed to the tree are aligned with
//! `feature_names`, with `NaN` marking a missing value.

use crate::core::error::{EsMlError, Result};
use crate::core::types::{NodeIndex, TargetType};
use crate::invalid_definition;
use crate::tree::node::TreeNode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decision tree as serialized under `{"tree": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    /// Names of the features the tree splits on
    pub feature_names: Vec<String>,
    /// Flat node list, root first
    pub tree_structure: Vec<TreeNode>,
    /// Output interpretation
    #[serde(default)]
    pub target_type: TargetType,
    /// Labels for class indices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification_labels: Option<Vec<String>>,
}

impl Tree {
    /// Creates a regression tree over the given nodes.
    pub fn new(feature_names: Vec<String>, tree_structure: Vec<TreeNode>) -> Self {
        Tree {
            feature_names,
            tree_structure,
            target_type: TargetType::Regression,
            classification_labels: None,
        }
    }

    /// Creates a tree consisting of a single leaf.
    pub fn constant(feature_names: Vec<String>, leaf_value: Vec<f64>) -> Self {
        Tree::new(feature_names, vec![TreeNode::leaf(0, leaf_value)])
    }

    /// Sets the target type.
    pub fn with_target_type(mut self, target_type: TargetType) -> Self {
        self.target_type = target_type;
        self
    }

    /// Sets the classification labels.
    pub fn with_classification_labels(mut self, labels: Option<Vec<String>>) -> Self {
        self.classification_labels = labels;
        self
    }

    /// Returns the number of nodes in the tree.
    pub fn num_nodes(&self) -> usize {
        self.tree_structure.len()
    }

    /// Returns the number of leaf nodes in the tree.
    pub fn num_leaves(&self) -> usize {
        self.tree_structure.iter().filter(|n| n.is_leaf()).count()
    }

    /// Returns the node at the given index.
    pub fn node(&self, index: NodeIndex) -> Option<&TreeNode> {
        self.tree_structure.get(index)
    }

    /// Number of values each leaf holds.
    pub fn leaf_width(&self) -> usize {
        self.tree_structure
            .iter()
            .find_map(|n| n.leaf_value.as_ref().map(Vec::len))
            .unwrap_or(0)
    }

    /// Whether every node carries `number_samples`.
    pub fn has_sample_counts(&self) -> bool {
        self.tree_structure.iter().all(|n| n.number_samples.is_some())
    }

    /// Largest class index referenced by single-valued leaves.
    pub fn highest_class_index(&self) -> usize {
        self.tree_structure
            .iter()
            .filter_map(|n| n.leaf_value.as_ref().and_then(|v| v.first()))
            .fold(0.0_f64, |acc, &v| acc.max(v))
            .max(0.0) as usize
    }

    /// Checks the structure of the tree.
    ///
    /// `num_features` is the length of the feature vector the tree will see.
    pub fn validate(&self, num_features: usize) -> Result<()> {
        if self.tree_structure.is_empty() {
            return Err(invalid_definition!("tree has no nodes"));
        }

        let num_nodes = self.tree_structure.len();
        let mut parents = vec![0usize; num_nodes];
        let mut leaf_width = None;

        for (position, node) in self.tree_structure.iter().enumerate() {
            if node.node_index != position {
                return Err(invalid_definition!(
                    "node at position {} has node_index {}",
                    position,
                    node.node_index
                ));
            }

            if node.is_leaf() {
                let values = node.leaf_value.as_ref().ok_or_else(|| {
                    invalid_definition!("leaf node {} has no leaf_value", position)
                })?;
                if values.is_empty() {
                    return Err(invalid_definition!("leaf node {} has an empty leaf_value", position));
                }
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(invalid_definition!(
                        "leaf node {} has a non-finite leaf_value",
                        position
                    ));
                }
                match leaf_width {
                    None => leaf_width = Some(values.len()),
                    Some(width) if width != values.len() => {
                        return Err(invalid_definition!(
                            "leaf node {} has {} values, expected {}",
                            position,
                            values.len(),
                            width
                        ));
                    }
                    Some(_) => {}
                }
                continue;
            }

            let (left, right) = match (node.left_child, node.right_child) {
                (Some(l), Some(r)) => (l, r),
                _ => {
                    return Err(invalid_definition!(
                        "split node {} must have both children",
                        position
                    ))
                }
            };
            for child in [left, right] {
                if child >= num_nodes || child == 0 || child == position {
                    return Err(invalid_definition!(
                        "split node {} references invalid child {}",
                        position,
                        child
                    ));
                }
                parents[child] += 1;
            }

            let feature = node.split_feature.ok_or_else(|| {
                invalid_definition!("split node {} has no split_feature", position)
            })?;
            if feature >= num_features {
                return Err(invalid_definition!(
                    "split node {} uses feature {} but only {} features exist",
                    position,
                    feature,
                    num_features
                ));
            }
            match node.threshold {
                Some(t) if t.is_finite() => {}
                _ => {
                    return Err(invalid_definition!(
                        "split node {} has a missing or non-finite threshold",
                        position
                    ))
                }
            }
        }

        if let Some(orphan) = parents.iter().skip(1).position(|&p| p != 1) {
            return Err(invalid_definition!(
                "node {} must have exactly one parent",
                orphan + 1
            ));
        }

        if self.target_type == TargetType::Classification {
            if let Some(labels) = &self.classification_labels {
                let classes = match self.leaf_width() {
                    1 => self.highest_class_index() + 1,
                    width => width,
                };
                if labels.len() < classes {
                    return Err(invalid_definition!(
                        "tree predicts {} classes but has {} classification labels",
                        classes,
                        labels.len()
                    ));
                }
            }
        }

        Ok(())
    }

    /// Index of the leaf reached by `features`.
    pub fn leaf_index(&self, features: &[f64]) -> Result<NodeIndex> {
        let mut index = 0;
        // A well-formed tree visits each node at most once.
        for _ in 0..=self.tree_structure.len() {
            let node = self.tree_structure.get(index).ok_or_else(|| {
                EsMlError::prediction(format!("node index {} out of bounds", index))
            })?;
            if node.is_leaf() {
                return Ok(index);
            }
            let value = node
                .split_feature
                .and_then(|f| features.get(f))
                .copied();
            index = node.next_child(value).ok_or_else(|| {
                EsMlError::prediction(format!("split node {} is incomplete", index))
            })?;
        }
        Err(EsMlError::prediction("tree traversal did not reach a leaf"))
    }

    /// Leaf values reached by `features`.
    pub fn predict_raw(&self, features: &[f64]) -> Result<&[f64]> {
        let index = self.leaf_index(features)?;
        self.tree_structure[index]
            .leaf_value
            .as_deref()
            .ok_or_else(|| EsMlError::prediction(format!("leaf {} has no value", index)))
    }

    /// Sample-weighted mean of the first leaf value.
    ///
    /// Requires `number_samples` on every node.
    pub fn expected_value(&self) -> Result<f64> {
        let root_samples = self
            .tree_structure
            .first()
            .and_then(|n| n.number_samples)
            .ok_or_else(|| EsMlError::prediction("tree has no root sample count"))?;
        if root_samples == 0 {
            return Err(EsMlError::prediction("tree root has zero samples"));
        }

        let mut total = 0.0;
        for node in self.tree_structure.iter().filter(|n| n.is_leaf()) {
            let samples = node.number_samples.ok_or_else(|| {
                EsMlError::prediction(format!("leaf {} has no sample count", node.node_index))
            })?;
            let value = node.leaf_value.as_ref().and_then(|v| v.first()).copied().unwrap_or(0.0);
            total += samples as f64 * value;
        }
        Ok(total / root_samples as f64)
    }

    /// Returns the tree depth (number of edges on the longest root-leaf path).
    pub fn depth(&self) -> usize {
        fn walk(tree: &Tree, index: NodeIndex, depth: usize, budget: usize) -> usize {
            match tree.tree_structure.get(index) {
                Some(node) if !node.is_leaf() && budget > 0 => {
                    let left = node.left_child.map_or(depth, |c| walk(tree, c, depth + 1, budget - 1));
                    let right = node.right_child.map_or(depth, |c| walk(tree, c, depth + 1, budget - 1));
                    left.max(right)
                }
                _ => depth,
            }
        }
        walk(self, 0, 0, self.tree_structure.len())
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_node(tree: &Tree, index: NodeIndex, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let node = match tree.tree_structure.get(index) {
                Some(node) => node,
                None => return writeln!(f, "{:indent$}<missing node {}>", "", index, indent = indent),
            };
            if let Some(values) = node.leaf_value.as_ref().filter(|_| node.is_leaf()) {
                return writeln!(f, "{:indent$}leaf {}: {:?}", "", index, values, indent = indent);
            }
            let name = node
                .split_feature
                .and_then(|i| tree.feature_names.get(i))
                .map(String::as_str)
                .unwrap_or("?");
            writeln!(
                f,
                "{:indent$}node {}: {} {} {}",
                "",
                index,
                name,
                node.decision_type.unwrap_or_default(),
                node.threshold.unwrap_or(f64::NAN),
                indent = indent
            )?;
            if indent > 2 * tree.tree_structure.len() {
                return Ok(());
            }
            if let Some(left) = node.left_child {
                write_node(tree, left, indent + 2, f)?;
            }
            if let Some(right) = node.right_child {
                write_node(tree, right, indent + 2, f)?;
            }
            Ok(())
        }

        if self.tree_structure.is_empty() {
            return write!(f, "Empty tree");
        }
        write_node(self, 0, 0, f)
    }
}
