//! XGBoost gbtree and dart boosters.
//!
//! Trees split with `x < threshold` in single precision. The global bias is
//! written as a leading single-leaf tree holding the base margin, so the
//! aggregator only has to apply the objective's output transformation.
//! Multi-class boosters grow one tree per class and iteration; their leaves
//! become vectors with the value at the tree's class position.

use super::{index_labels, LocalModel, ModelTransformer};
use crate::core::error::{EsMlError, Result};
use crate::core::math::{argmax, logit, sigmoid, softmax};
use crate::core::types::{ModelType, TargetType};
use crate::definition::TrainedModel;
use crate::ensemble::{AggregateOutput, Ensemble};
use crate::io::xgboost::{XgbModel, XgbTree};
use crate::tree::{DecisionType, Tree, TreeNode};

/// How an objective turns the summed margin into a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XgbObjectiveKind {
    /// Margin is the prediction
    Identity,
    /// Sigmoid of the margin, regression target
    Logistic,
    /// `exp` of the margin
    Exponential,
    /// Sigmoid of the margin, two classes
    Binary,
    /// Softmax over per-class margins
    Multiclass,
}

impl XgbObjectiveKind {
    /// Maps an objective name, rejecting the ones without a definition equivalent.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "reg:squarederror" | "reg:linear" | "reg:squaredlogerror"
            | "reg:pseudohubererror" | "reg:absoluteerror" => Ok(XgbObjectiveKind::Identity),
            "reg:logistic" => Ok(XgbObjectiveKind::Logistic),
            "reg:gamma" | "reg:tweedie" | "count:poisson" => Ok(XgbObjectiveKind::Exponential),
            "binary:logistic" => Ok(XgbObjectiveKind::Binary),
            "multi:softmax" | "multi:softprob" => Ok(XgbObjectiveKind::Multiclass),
            other => Err(EsMlError::unsupported_model(format!(
                "xgboost objective '{}' is not supported",
                other
            ))),
        }
    }

    /// Model type produced by the objective
    pub fn model_type(self) -> ModelType {
        match self {
            XgbObjectiveKind::Binary | XgbObjectiveKind::Multiclass => ModelType::Classification,
            _ => ModelType::Regression,
        }
    }

    /// Converts `base_score` into margin space.
    pub fn base_margin(self, base_score: f64) -> f64 {
        match self {
            XgbObjectiveKind::Logistic | XgbObjectiveKind::Binary => logit(base_score),
            XgbObjectiveKind::Exponential => base_score.max(f64::MIN_POSITIVE).ln(),
            XgbObjectiveKind::Identity | XgbObjectiveKind::Multiclass => base_score,
        }
    }

    fn aggregate_output(self, weights: Vec<f64>) -> AggregateOutput {
        match self {
            XgbObjectiveKind::Identity => AggregateOutput::WeightedSum { weights },
            XgbObjectiveKind::Exponential => AggregateOutput::Exponent { weights },
            XgbObjectiveKind::Logistic
            | XgbObjectiveKind::Binary
            | XgbObjectiveKind::Multiclass => AggregateOutput::LogisticRegression { weights },
        }
    }
}

impl XgbTree {
    /// Converts one booster tree; `group` is placed in a vector of `num_groups`
    /// when the booster is multi-class.
    pub fn to_tree(&self, feature_names: &[String], group: usize, num_groups: usize) -> Tree {
        let leaf = |value: f64| -> Vec<f64> {
            if num_groups > 1 {
                let mut values = vec![0.0; num_groups];
                values[group] = value;
                values
            } else {
                vec![value]
            }
        };
        let nodes = (0..self.num_nodes())
            .map(|i| {
                if self.is_leaf(i) {
                    return TreeNode::leaf(i, leaf(self.split_conditions[i] as f64));
                }
                let node = TreeNode::split(
                    i,
                    self.split_indices[i] as usize,
                    self.split_conditions[i] as f64,
                    DecisionType::Lt,
                    self.default_left[i] != 0,
                    self.left_children[i] as usize,
                    self.right_children[i] as usize,
                );
                match self.loss_changes.get(i) {
                    Some(&gain) => node.with_split_gain(gain),
                    None => node,
                }
            })
            .collect();
        Tree::new(feature_names.to_vec(), nodes)
    }

    /// Leaf value reached by `row`.
    pub fn predict_leaf(&self, row: &[f64]) -> Result<f64> {
        let mut node = 0;
        for _ in 0..self.num_nodes() {
            if self.is_leaf(node) {
                return Ok(self.split_conditions[node] as f64);
            }
            let feature = self.split_indices[node] as usize;
            let value = *row.get(feature).ok_or_else(|| {
                EsMlError::dimension_mismatch(
                    format!("at least {} features", feature + 1),
                    format!("{} features", row.len()),
                )
            })?;
            let go_left = if value.is_nan() {
                self.default_left[node] != 0
            } else {
                (value as f32) < self.split_conditions[node]
            };
            node = if go_left {
                self.left_children[node]
            } else {
                self.right_children[node]
            } as usize;
        }
        Err(EsMlError::prediction("xgboost tree traversal did not reach a leaf"))
    }
}

impl XgbModel {
    /// Objective kind of the learner
    pub fn objective_kind(&self) -> Result<XgbObjectiveKind> {
        XgbObjectiveKind::from_name(&self.learner.objective.name)
    }

    /// Base margin per output group
    pub fn base_margin(&self) -> Result<f64> {
        Ok(self
            .objective_kind()?
            .base_margin(self.learner.learner_model_param.base_score))
    }

    /// Summed margin per output group, base margin included.
    pub fn predict_margin(&self, row: &[f64]) -> Result<Vec<f64>> {
        let model = self.tree_model()?;
        let weights = self.tree_weights()?;
        let mut margin = vec![self.base_margin()?; self.num_groups()];
        for (i, tree) in model.trees.iter().enumerate() {
            margin[self.tree_group(i)?] += weights[i] * tree.predict_leaf(row)?;
        }
        Ok(margin)
    }
}

impl ModelTransformer for XgbModel {
    fn model_type(&self) -> ModelType {
        self.objective_kind()
            .map_or(ModelType::Regression, XgbObjectiveKind::model_type)
    }

    fn num_features(&self) -> usize {
        self.learner.learner_model_param.num_feature
    }

    fn num_classes(&self) -> usize {
        match self.objective_kind() {
            Ok(XgbObjectiveKind::Binary) => 2,
            Ok(XgbObjectiveKind::Multiclass) => self.num_groups(),
            _ => 0,
        }
    }

    fn classification_labels(&self) -> Option<Vec<String>> {
        match self.model_type() {
            ModelType::Classification => Some(index_labels(self.num_classes())),
            ModelType::Regression => None,
        }
    }

    fn feature_names(&self) -> Vec<String> {
        if self.learner.feature_names.len() == self.num_features() {
            self.learner.feature_names.clone()
        } else {
            super::default_feature_names(self.num_features())
        }
    }

    fn to_trained_model(&self, feature_names: &[String]) -> Result<TrainedModel> {
        let kind = self.objective_kind()?;
        let model = self.tree_model()?;
        let target_type = match kind {
            XgbObjectiveKind::Binary | XgbObjectiveKind::Multiclass => TargetType::Classification,
            _ => TargetType::Regression,
        };
        let num_groups = if kind == XgbObjectiveKind::Multiclass {
            self.num_groups()
        } else {
            1
        };

        let base = Tree::constant(
            feature_names.to_vec(),
            vec![self.base_margin()?; num_groups],
        );
        let mut trees = vec![base.with_target_type(target_type)];
        for (i, tree) in model.trees.iter().enumerate() {
            let group = if num_groups > 1 { self.tree_group(i)? } else { 0 };
            trees.push(
                tree.to_tree(feature_names, group, num_groups)
                    .with_target_type(target_type),
            );
        }

        let mut weights = vec![1.0];
        weights.extend(self.tree_weights()?);
        log::debug!(
            "Converted xgboost {} booster with {} trees",
            self.learner.objective.name,
            model.trees.len()
        );

        Ok(Ensemble::new(feature_names.to_vec(), trees, kind.aggregate_output(weights))
            .with_target_type(target_type)
            .with_classification_labels(self.classification_labels())
            .into())
    }
}

impl LocalModel for XgbModel {
    fn predict_row(&self, row: &[f64]) -> Result<f64> {
        let kind = self.objective_kind()?;
        let margin = self.predict_margin(row)?;
        let first = margin[0];
        Ok(match kind {
            XgbObjectiveKind::Identity => first,
            XgbObjectiveKind::Logistic => sigmoid(first),
            XgbObjectiveKind::Exponential => first.exp(),
            XgbObjectiveKind::Binary => {
                if sigmoid(first) > 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
            XgbObjectiveKind::Multiclass => argmax(&margin).unwrap_or(0) as f64,
        })
    }

    fn predict_proba_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        let mut margin = self.predict_margin(row)?;
        match self.objective_kind()? {
            XgbObjectiveKind::Binary => {
                let p = sigmoid(margin[0]);
                Ok(vec![1.0 - p, p])
            }
            XgbObjectiveKind::Multiclass => {
                softmax(&mut margin);
                Ok(margin)
            }
            _ => Err(EsMlError::prediction(
                "regression models do not produce class probabilities",
            )),
        }
    }
}
