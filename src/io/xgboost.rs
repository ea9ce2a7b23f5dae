//! XGBoost JSON model format (`save_model("model.json")`).
//!
//! Only the parts needed to rebuild the trees are modelled. XGBoost writes
//! many scalar parameters as strings (`"num_class": "3"`) and, since 2.0,
//! `base_score` as a bracketed list (`"[5E-1]"`), so those fields go through
//! lenient deserializers.

use crate::core::error::{EsMlError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::Path;

/// Parses a number written as a number, a string, or a one-element list.
fn lenient_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let t = s.trim();
            if let Ok(v) = t.parse::<f64>() {
                return Some(v);
            }
            let inner = t.strip_prefix('[')?.strip_suffix(']')?;
            inner.split(',').next()?.trim().parse::<f64>().ok()
        }
        Value::Array(items) => items.first().and_then(lenient_number),
        _ => None,
    }
}

fn deserialize_f64<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;
    let value = Value::deserialize(deserializer)?;
    lenient_number(&value).ok_or_else(|| D::Error::custom(format!("expected a number, got {}", value)))
}

fn deserialize_usize<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;
    let value = deserialize_f64(deserializer)?;
    if value < 0.0 || value.fract() != 0.0 {
        return Err(D::Error::custom(format!("expected a non-negative integer, got {}", value)));
    }
    Ok(value as usize)
}

/// One booster tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XgbTree {
    /// Left child per node, `-1` for leaves
    pub left_children: Vec<i32>,
    /// Right child per node, `-1` for leaves
    pub right_children: Vec<i32>,
    /// Split feature per node
    pub split_indices: Vec<i32>,
    /// Split threshold per node; the leaf value for leaves
    pub split_conditions: Vec<f32>,
    /// Missing-value direction per node (0 or 1)
    pub default_left: Vec<i32>,
    /// Split kind per node, 1 for categorical
    #[serde(default)]
    pub split_type: Vec<i32>,
    /// Split gain per node
    #[serde(default)]
    pub loss_changes: Vec<f64>,
}

impl XgbTree {
    /// Number of nodes
    pub fn num_nodes(&self) -> usize {
        self.left_children.len()
    }

    /// Whether node `i` is a leaf
    pub fn is_leaf(&self, i: usize) -> bool {
        self.left_children[i] == -1
    }

    /// Checks array lengths, child indices and split kinds.
    pub fn validate(&self, num_feature: usize) -> Result<()> {
        let n = self.num_nodes();
        if n == 0 {
            return Err(EsMlError::model_parse("xgboost tree has no nodes"));
        }
        for (name, len) in [
            ("right_children", self.right_children.len()),
            ("split_indices", self.split_indices.len()),
            ("split_conditions", self.split_conditions.len()),
            ("default_left", self.default_left.len()),
        ] {
            if len != n {
                return Err(EsMlError::model_parse(format!(
                    "xgboost tree array {} has {} entries, expected {}",
                    name, len, n
                )));
            }
        }
        if self.split_type.iter().any(|&t| t != 0) {
            return Err(EsMlError::unsupported_model(
                "xgboost categorical splits cannot be expressed as a model definition",
            ));
        }
        for i in 0..n {
            if self.is_leaf(i) {
                continue;
            }
            for child in [self.left_children[i], self.right_children[i]] {
                if child <= 0 || child as usize >= n {
                    return Err(EsMlError::model_parse(format!(
                        "xgboost node {} has invalid child {}",
                        i, child
                    )));
                }
            }
            let feature = self.split_indices[i];
            if feature < 0 || feature as usize >= num_feature {
                return Err(EsMlError::model_parse(format!(
                    "xgboost node {} splits on feature {} of {}",
                    i, feature, num_feature
                )));
            }
        }
        Ok(())
    }
}

/// `gradient_booster.model` of a tree booster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XgbTreeModel {
    /// Trees in boosting order
    pub trees: Vec<XgbTree>,
    /// Output group (class) of each tree
    #[serde(default)]
    pub tree_info: Vec<i32>,
}

/// `gbtree` wrapper nested inside a dart booster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XgbGbtree {
    /// Tree model
    pub model: XgbTreeModel,
}

/// Gradient booster, tagged by `"name"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum XgbGradientBooster {
    /// Plain tree booster
    Gbtree {
        /// Tree model
        model: XgbTreeModel,
    },
    /// Dropout tree booster
    Dart {
        /// Underlying tree booster
        gbtree: XgbGbtree,
        /// Per-tree output weights
        weight_drop: Vec<f64>,
    },
    /// Linear booster
    Gblinear {
        /// Raw model, not interpreted
        model: Value,
    },
}

/// `learner.learner_model_param`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XgbLearnerModelParam {
    /// Global bias in probability or target space
    #[serde(deserialize_with = "deserialize_f64")]
    pub base_score: f64,
    /// Number of classes; 0 for non-multiclass objectives
    #[serde(default, deserialize_with = "deserialize_usize")]
    pub num_class: usize,
    /// Number of input features
    #[serde(deserialize_with = "deserialize_usize")]
    pub num_feature: usize,
}

/// `learner.objective`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XgbObjective {
    /// Objective name, e.g. `binary:logistic`
    pub name: String,
}

/// `learner` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XgbLearner {
    /// Booster
    pub gradient_booster: XgbGradientBooster,
    /// Model parameters
    pub learner_model_param: XgbLearnerModelParam,
    /// Objective
    pub objective: XgbObjective,
    /// Feature names, if the model was trained with them
    #[serde(default)]
    pub feature_names: Vec<String>,
}

/// Whole XGBoost JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XgbModel {
    /// Learner
    pub learner: XgbLearner,
    /// Writer version
    #[serde(default)]
    pub version: Vec<u32>,
}

impl XgbModel {
    /// Parses and validates a JSON model.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let model: XgbModel = serde_json::from_str(json)
            .map_err(|e| EsMlError::model_parse(format!("invalid xgboost model: {}", e)))?;
        model.validate()?;
        Ok(model)
    }

    /// Reads a JSON model from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Tree model of gbtree and dart boosters.
    pub fn tree_model(&self) -> Result<&XgbTreeModel> {
        match &self.learner.gradient_booster {
            XgbGradientBooster::Gbtree { model } => Ok(model),
            XgbGradientBooster::Dart { gbtree, .. } => Ok(&gbtree.model),
            XgbGradientBooster::Gblinear { .. } => Err(EsMlError::unsupported_model(
                "xgboost gblinear boosters are not tree models",
            )),
        }
    }

    /// Output weight of every tree (dart weights, otherwise 1).
    pub fn tree_weights(&self) -> Result<Vec<f64>> {
        let n = self.tree_model()?.trees.len();
        match &self.learner.gradient_booster {
            XgbGradientBooster::Dart { weight_drop, .. } => {
                if weight_drop.len() != n {
                    return Err(EsMlError::model_parse(format!(
                        "dart booster has {} weights for {} trees",
                        weight_drop.len(),
                        n
                    )));
                }
                Ok(weight_drop.clone())
            }
            _ => Ok(vec![1.0; n]),
        }
    }

    /// Number of output groups
    pub fn num_groups(&self) -> usize {
        self.learner.learner_model_param.num_class.max(1)
    }

    /// Output group of tree `i`
    pub fn tree_group(&self, i: usize) -> Result<usize> {
        let model = self.tree_model()?;
        let group = match model.tree_info.get(i) {
            Some(&g) if g >= 0 => g as usize,
            Some(&g) => {
                return Err(EsMlError::model_parse(format!("tree {} has group {}", i, g)));
            }
            None => i % self.num_groups(),
        };
        if group >= self.num_groups() {
            return Err(EsMlError::model_parse(format!(
                "tree {} belongs to group {} of {}",
                i,
                group,
                self.num_groups()
            )));
        }
        Ok(group)
    }

    /// Checks the booster and every tree.
    pub fn validate(&self) -> Result<()> {
        let model = self.tree_model()?;
        if !model.tree_info.is_empty() && model.tree_info.len() != model.trees.len() {
            return Err(EsMlError::model_parse(format!(
                "tree_info has {} entries for {} trees",
                model.tree_info.len(),
                model.trees.len()
            )));
        }
        let num_feature = self.learner.learner_model_param.num_feature;
        for (i, tree) in model.trees.iter().enumerate() {
            tree.validate(num_feature)
                .map_err(|e| match e {
                    EsMlError::ModelParse { message } => {
                        EsMlError::model_parse(format!("tree {}: {}", i, message))
                    }
                    other => other,
                })?;
            self.tree_group(i)?;
        }
        self.tree_weights()?;
        Ok(())
    }
}
