//! JSON mirror of fitted scikit-learn tree estimators.
//!
//! The document carries the estimator kind under `"type"` and the arrays of
//! each fitted `tree_` object:
//!
//! ```json
//! {
//!   "type": "DecisionTreeClassifier",
//!   "n_features_in": 2,
//!   "classes": [0, 1],
//!   "tree": {
//!     "children_left": [1, -1, -1],
//!     "children_right": [2, -1, -1],
//!     "feature": [0, -2, -2],
//!     "threshold": [0.5, -2.0, -2.0],
//!     "value": [[5, 5], [4, 1], [1, 4]],
//!     "n_node_samples": [10, 5, 5]
//!   }
//! }
//! ```

use crate::core::error::{EsMlError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Marker sklearn uses for "no child"
pub const TREE_LEAF: i64 = -1;

/// Arrays of one fitted sklearn tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SklearnTree {
    /// Left child per node, `-1` for leaves
    pub children_left: Vec<i64>,
    /// Right child per node, `-1` for leaves
    pub children_right: Vec<i64>,
    /// Split feature per node, negative for leaves
    pub feature: Vec<i64>,
    /// Split threshold per node
    pub threshold: Vec<f64>,
    /// Per node: mean target for regressors, class counts or fractions for classifiers
    pub value: Vec<Vec<f64>>,
    /// Training samples per node
    pub n_node_samples: Vec<u64>,
    /// Per node: whether missing values go left (sklearn >= 1.3)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_go_to_left: Option<Vec<u8>>,
}

impl SklearnTree {
    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.children_left.len()
    }

    /// Whether node `i` is a leaf
    pub fn is_leaf(&self, i: usize) -> bool {
        self.children_left[i] == TREE_LEAF
    }

    /// Missing-value direction of node `i`
    pub fn missing_left(&self, i: usize) -> bool {
        self.missing_go_to_left
            .as_ref()
            .and_then(|m| m.get(i))
            .map_or(false, |&v| v != 0)
    }

    /// Checks array lengths and child indices.
    pub fn validate(&self, n_features: usize) -> Result<()> {
        let n = self.node_count();
        if n == 0 {
            return Err(EsMlError::model_parse("sklearn tree has no nodes"));
        }
        let lengths = [
            ("children_right", self.children_right.len()),
            ("feature", self.feature.len()),
            ("threshold", self.threshold.len()),
            ("value", self.value.len()),
            ("n_node_samples", self.n_node_samples.len()),
        ];
        for (name, len) in lengths {
            if len != n {
                return Err(EsMlError::model_parse(format!(
                    "sklearn tree array {} has {} entries, expected {}",
                    name, len, n
                )));
            }
        }
        if let Some(missing) = &self.missing_go_to_left {
            if missing.len() != n {
                return Err(EsMlError::model_parse(format!(
                    "sklearn tree array missing_go_to_left has {} entries, expected {}",
                    missing.len(),
                    n
                )));
            }
        }

        for i in 0..n {
            let (left, right) = (self.children_left[i], self.children_right[i]);
            if (left == TREE_LEAF) != (right == TREE_LEAF) {
                return Err(EsMlError::model_parse(format!(
                    "sklearn node {} has exactly one child",
                    i
                )));
            }
            if left == TREE_LEAF {
                if self.value[i].is_empty() {
                    return Err(EsMlError::model_parse(format!("sklearn leaf {} has no value", i)));
                }
                continue;
            }
            for child in [left, right] {
                if child <= i as i64 || child >= n as i64 {
                    return Err(EsMlError::model_parse(format!(
                        "sklearn node {} has invalid child {}",
                        i, child
                    )));
                }
            }
            if self.feature[i] < 0 || self.feature[i] as usize >= n_features {
                return Err(EsMlError::model_parse(format!(
                    "sklearn node {} splits on feature {} of {}",
                    i, self.feature[i], n_features
                )));
            }
        }
        Ok(())
    }
}

/// Fitted `DecisionTreeClassifier`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTreeClassifier {
    /// Number of input features
    pub n_features_in: usize,
    /// Class values in index order
    pub classes: Vec<f64>,
    /// Fitted tree
    pub tree: SklearnTree,
}

/// Fitted `DecisionTreeRegressor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTreeRegressor {
    /// Number of input features
    pub n_features_in: usize,
    /// Fitted tree
    pub tree: SklearnTree,
}

/// Fitted `RandomForestClassifier`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    /// Number of input features
    pub n_features_in: usize,
    /// Class values in index order
    pub classes: Vec<f64>,
    /// Fitted trees of the forest
    pub estimators: Vec<SklearnTree>,
}

/// Fitted `RandomForestRegressor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    /// Number of input features
    pub n_features_in: usize,
    /// Fitted trees of the forest
    pub estimators: Vec<SklearnTree>,
}

/// Any supported sklearn estimator, tagged by `"type"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SklearnModel {
    /// Single classification tree
    DecisionTreeClassifier(DecisionTreeClassifier),
    /// Single regression tree
    DecisionTreeRegressor(DecisionTreeRegressor),
    /// Forest of classification trees
    RandomForestClassifier(RandomForestClassifier),
    /// Forest of regression trees
    RandomForestRegressor(RandomForestRegressor),
}

impl SklearnModel {
    /// Parses and validates a model document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let model: SklearnModel = serde_json::from_str(json)
            .map_err(|e| EsMlError::model_parse(format!("invalid sklearn model: {}", e)))?;
        model.validate()?;
        Ok(model)
    }

    /// Reads a model document from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Checks every tree against the declared feature and class counts.
    pub fn validate(&self) -> Result<()> {
        let (n_features, trees, classes): (usize, Vec<&SklearnTree>, Option<&[f64]>) = match self {
            SklearnModel::DecisionTreeClassifier(m) => (m.n_features_in, vec![&m.tree], Some(m.classes.as_slice())),
            SklearnModel::DecisionTreeRegressor(m) => (m.n_features_in, vec![&m.tree], None),
            SklearnModel::RandomForestClassifier(m) => {
                (m.n_features_in, m.estimators.iter().collect(), Some(m.classes.as_slice()))
            }
            SklearnModel::RandomForestRegressor(m) => {
                (m.n_features_in, m.estimators.iter().collect(), None)
            }
        };

        if trees.is_empty() {
            return Err(EsMlError::model_parse("sklearn forest has no estimators"));
        }
        for tree in &trees {
            tree.validate(n_features)?;
            let expected = classes.map_or(1, |c| c.len());
            if let Some(bad) = tree.value.iter().find(|v| v.len() != expected) {
                return Err(EsMlError::model_parse(format!(
                    "sklearn node value has {} entries, expected {}",
                    bad.len(),
                    expected
                )));
            }
        }
        if let Some(classes) = classes {
            if classes.len() < 2 {
                return Err(EsMlError::model_parse("sklearn classifier needs at least 2 classes"));
            }
        }
        Ok(())
    }
}
