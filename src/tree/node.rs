//! Tree node of a model definition.
//!
//! A node is either a split (feature, threshold, operator, children) or a
//! leaf (one or more output values). Both kinds may carry the number of
//! training samples that reached them.

use crate::core::types::{FeatureIndex, NodeIndex};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Comparison applied at a split: go left when `value OP threshold` holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DecisionType {
    /// `value < threshold`
    Lt,
    /// `value <= threshold`
    #[default]
    Lte,
    /// `value > threshold`
    Gt,
    /// `value >= threshold`
    Gte,
    /// `value == threshold`
    Eq,
}

impl DecisionType {
    /// Evaluate the comparison
    #[inline]
    pub fn go_left(self, value: f64, threshold: f64) -> bool {
        match self {
            DecisionType::Lt => value < threshold,
            DecisionType::Lte => value <= threshold,
            DecisionType::Gt => value > threshold,
            DecisionType::Gte => value >= threshold,
            DecisionType::Eq => value == threshold,
        }
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            DecisionType::Lt => "<",
            DecisionType::Lte => "<=",
            DecisionType::Gt => ">",
            DecisionType::Gte => ">=",
            DecisionType::Eq => "==",
        };
        f.write_str(op)
    }
}

/// Tree node as stored in `tree_structure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Position of this node in `tree_structure`
    pub node_index: NodeIndex,
    /// Index into the tree's `feature_names`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_feature: Option<FeatureIndex>,
    /// Gain of the split, informational
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_gain: Option<f64>,
    /// Split threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Split comparison
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_type: Option<DecisionType>,
    /// Direction taken when the feature is missing
    #[serde(default = "default_left")]
    pub default_left: bool,
    /// Left child node index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_child: Option<NodeIndex>,
    /// Right child node index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_child: Option<NodeIndex>,
    /// Leaf outputs; one value for regression, one per class for vector leaves
    #[serde(
        default,
        deserialize_with = "deserialize_leaf_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub leaf_value: Option<Vec<f64>>,
    /// Training samples that reached this node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_samples: Option<u64>,
}

fn default_left() -> bool {
    true
}

/// `leaf_value` is written either as a bare number or as an array.
fn deserialize_leaf_value<'de, D>(deserializer: D) -> Result<Option<Vec<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(f64),
        Many(Vec<f64>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(v)) => Some(vec![v]),
        Some(OneOrMany::Many(v)) => Some(v),
        None => None,
    })
}

impl TreeNode {
    /// Create a leaf node
    pub fn leaf(node_index: NodeIndex, leaf_value: Vec<f64>) -> Self {
        TreeNode {
            node_index,
            split_feature: None,
            split_gain: None,
            threshold: None,
            decision_type: None,
            default_left: true,
            left_child: None,
            right_child: None,
            leaf_value: Some(leaf_value),
            number_samples: None,
        }
    }

    /// Create a split node
    pub fn split(
        node_index: NodeIndex,
        split_feature: FeatureIndex,
        threshold: f64,
        decision_type: DecisionType,
        default_left: bool,
        left_child: NodeIndex,
        right_child: NodeIndex,
    ) -> Self {
        TreeNode {
            node_index,
            split_feature: Some(split_feature),
            split_gain: None,
            threshold: Some(threshold),
            decision_type: Some(decision_type),
            default_left,
            left_child: Some(left_child),
            right_child: Some(right_child),
            leaf_value: None,
            number_samples: None,
        }
    }

    /// Attach a sample count
    pub fn with_number_samples(mut self, samples: u64) -> Self {
        self.number_samples = Some(samples);
        self
    }

    /// Attach a split gain
    pub fn with_split_gain(mut self, gain: f64) -> Self {
        self.split_gain = Some(gain);
        self
    }

    /// Leaf nodes have no children
    pub fn is_leaf(&self) -> bool {
        self.left_child.is_none() && self.right_child.is_none()
    }

    /// Child to follow for a feature value; `None` means missing.
    ///
    /// Only meaningful for split nodes.
    #[inline]
    pub fn next_child(&self, value: Option<f64>) -> Option<NodeIndex> {
        let go_left = match value {
            Some(v) if !v.is_nan() => {
                let threshold = self.threshold?;
                self.decision_type.unwrap_or_default().go_left(v, threshold)
            }
            _ => self.default_left,
        };
        if go_left {
            self.left_child
        } else {
            self.right_child
        }
    }
}
