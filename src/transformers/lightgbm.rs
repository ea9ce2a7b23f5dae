//! LightGBM boosters loaded from the text model format.
//!
//! Internal nodes keep their LightGBM numbering; leaf `k` is placed after
//! the internal nodes at `num_leaves - 1 + k`. Splits use `x <= threshold`.
//! Missing-value handling follows the node's missing type:
//!
//! - `None`: NaN is compared as 0.0, so a missing field takes the side
//!   0.0 falls on.
//! - `NaN`: NaN follows the default direction.
//! - `Zero`: zeros and NaN follow the default direction. The definition
//!   only routes missing fields that way, so a split whose default
//!   direction differs from the side 0.0 falls on is rejected.

use super::{index_labels, LocalModel, ModelTransformer};
use crate::core::error::{EsMlError, Result};
use crate::core::math::{argmax, sigmoid, softmax};
use crate::core::types::{ModelType, TargetType};
use crate::definition::TrainedModel;
use crate::ensemble::{AggregateOutput, Ensemble};
use crate::io::lightgbm::{LgbModel, LgbTree, MissingType, SplitKind};
use crate::tree::{DecisionType, Tree, TreeNode};
use crate::unsupported_model;

/// Values with a smaller magnitude count as zero for `Zero` missing type
pub const ZERO_THRESHOLD: f64 = 1e-35;

/// How an objective turns the raw score into a prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LgbObjectiveKind {
    /// Raw score is the prediction
    Identity,
    /// `exp` of the raw score
    Exponential,
    /// `sigmoid(sigma * raw)`, two classes
    Binary {
        /// Sigmoid scale
        sigma: f64,
    },
    /// Sigmoid of the raw score, probability-valued regression
    CrossEntropy,
    /// Softmax over per-class scores
    Multiclass,
    /// Independent sigmoid per class
    MulticlassOva {
        /// Sigmoid scale
        sigma: f64,
    },
}

impl LgbObjectiveKind {
    /// Maps the model's objective, rejecting the ones without a definition equivalent.
    pub fn from_model(model: &LgbModel) -> Result<Self> {
        let objective = &model.objective;
        if objective.has_flag("sqrt") {
            return Err(EsMlError::unsupported_model(
                "lightgbm objectives trained with sqrt are not supported",
            ));
        }
        let sigma = objective.param_f64("sigmoid").unwrap_or(1.0);
        match objective.name.as_str() {
            "regression" | "regression_l2" | "regression_l1" | "huber" | "fair" | "quantile"
            | "mape" => Ok(LgbObjectiveKind::Identity),
            "poisson" | "gamma" | "tweedie" => Ok(LgbObjectiveKind::Exponential),
            "binary" => Ok(LgbObjectiveKind::Binary { sigma }),
            "cross_entropy" | "xentropy" => Ok(LgbObjectiveKind::CrossEntropy),
            "multiclass" | "softmax" => Ok(LgbObjectiveKind::Multiclass),
            "multiclassova" | "multiclass_ova" | "ova" | "ovr" => {
                Ok(LgbObjectiveKind::MulticlassOva { sigma })
            }
            other => Err(unsupported_model!(
                "lightgbm objective '{}' is not supported",
                other
            )),
        }
    }

    /// Model type produced by the objective
    pub fn model_type(self) -> ModelType {
        match self {
            LgbObjectiveKind::Binary { .. }
            | LgbObjectiveKind::Multiclass
            | LgbObjectiveKind::MulticlassOva { .. } => ModelType::Classification,
            _ => ModelType::Regression,
        }
    }

    /// Factor applied to every leaf value in the definition
    fn leaf_scale(self) -> f64 {
        match self {
            LgbObjectiveKind::Binary { sigma } => sigma,
            _ => 1.0,
        }
    }
}

/// Whether a split sends `value` left, as LightGBM's numerical decision does.
pub fn goes_left(value: f64, threshold: f64, kind: SplitKind) -> bool {
    let mut value = value;
    if kind.missing_type != MissingType::NaN && value.is_nan() {
        value = 0.0;
    }
    let is_missing = match kind.missing_type {
        MissingType::Zero => value.abs() <= ZERO_THRESHOLD,
        MissingType::NaN => value.is_nan(),
        MissingType::None => false,
    };
    if is_missing {
        kind.default_left
    } else {
        value <= threshold
    }
}

impl LgbTree {
    /// Definition node index of a LightGBM child reference.
    fn node_index(&self, child: i32) -> usize {
        if child < 0 {
            self.num_splits() + (!child) as usize
        } else {
            child as usize
        }
    }

    /// Converts one tree; `class` is placed in a vector of `num_classes`
    /// when the booster is multi-class.
    pub fn to_tree(
        &self,
        feature_names: &[String],
        class: usize,
        num_classes: usize,
        scale: f64,
    ) -> Result<Tree> {
        let leaf = |value: f64| -> Vec<f64> {
            if num_classes > 1 {
                let mut values = vec![0.0; num_classes];
                values[class] = value * scale;
                values
            } else {
                vec![value * scale]
            }
        };

        let splits = self.num_splits();
        let mut nodes = Vec::with_capacity(splits + self.num_leaves);
        for i in 0..splits {
            let kind = SplitKind::from_bits(self.decision_type[i]);
            let threshold = self.threshold[i];
            let default_left = match kind.missing_type {
                MissingType::None => 0.0 <= threshold,
                MissingType::NaN => kind.default_left,
                MissingType::Zero => {
                    if kind.default_left != (0.0 <= threshold) {
                        return Err(unsupported_model!(
                            "lightgbm node {} treats zero as missing and sends it {} while 0.0 <= {} goes {}",
                            i,
                            if kind.default_left { "left" } else { "right" },
                            threshold,
                            if 0.0 <= threshold { "left" } else { "right" }
                        ));
                    }
                    kind.default_left
                }
            };
            let node = TreeNode::split(
                i,
                self.split_feature[i] as usize,
                threshold,
                DecisionType::Lte,
                default_left,
                self.node_index(self.left_child[i]),
                self.node_index(self.right_child[i]),
            );
            nodes.push(match self.split_gain.get(i) {
                Some(&gain) => node.with_split_gain(gain),
                None => node,
            });
        }
        for (k, &value) in self.leaf_value.iter().enumerate() {
            nodes.push(TreeNode::leaf(splits + k, leaf(value)));
        }
        Ok(Tree::new(feature_names.to_vec(), nodes))
    }

    /// Leaf value reached by `row`.
    pub fn predict_leaf(&self, row: &[f64]) -> Result<f64> {
        if self.num_leaves <= 1 {
            return Ok(self.leaf_value.first().copied().unwrap_or(0.0));
        }
        let mut node = 0usize;
        for _ in 0..self.num_splits() {
            let feature = self.split_feature[node] as usize;
            let value = *row.get(feature).ok_or_else(|| {
                EsMlError::dimension_mismatch(
                    format!("at least {} features", feature + 1),
                    format!("{} features", row.len()),
                )
            })?;
            let kind = SplitKind::from_bits(self.decision_type[node]);
            let child = if goes_left(value, self.threshold[node], kind) {
                self.left_child[node]
            } else {
                self.right_child[node]
            };
            if child < 0 {
                return Ok(self.leaf_value[(!child) as usize]);
            }
            node = child as usize;
        }
        Err(EsMlError::prediction("lightgbm tree traversal did not reach a leaf"))
    }
}

impl LgbModel {
    /// Objective kind of the booster
    pub fn objective_kind(&self) -> Result<LgbObjectiveKind> {
        LgbObjectiveKind::from_model(self)
    }

    /// Weight every tree contributes with
    fn tree_weight(&self) -> f64 {
        if self.average_output {
            1.0 / self.num_iterations().max(1) as f64
        } else {
            1.0
        }
    }

    /// Raw score per class.
    pub fn predict_raw(&self, row: &[f64]) -> Result<Vec<f64>> {
        let per_iteration = self.num_tree_per_iteration.max(1);
        let weight = self.tree_weight();
        let mut raw = vec![0.0; per_iteration];
        for (i, tree) in self.trees.iter().enumerate() {
            raw[i % per_iteration] += weight * tree.predict_leaf(row)?;
        }
        Ok(raw)
    }
}

impl ModelTransformer for LgbModel {
    fn model_type(&self) -> ModelType {
        self.objective_kind()
            .map_or(ModelType::Regression, LgbObjectiveKind::model_type)
    }

    fn num_features(&self) -> usize {
        LgbModel::num_features(self)
    }

    fn num_classes(&self) -> usize {
        match self.objective_kind() {
            Ok(LgbObjectiveKind::Binary { .. }) => 2,
            Ok(LgbObjectiveKind::Multiclass) | Ok(LgbObjectiveKind::MulticlassOva { .. }) => {
                self.num_class
            }
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
        if self.feature_names.len() == LgbModel::num_features(self) {
            self.feature_names.clone()
        } else {
            super::default_feature_names(LgbModel::num_features(self))
        }
    }

    fn to_trained_model(&self, feature_names: &[String]) -> Result<TrainedModel> {
        let kind = self.objective_kind()?;
        let target_type = match kind.model_type() {
            ModelType::Classification => TargetType::Classification,
            ModelType::Regression => TargetType::Regression,
        };
        let num_classes = match kind {
            LgbObjectiveKind::Multiclass | LgbObjectiveKind::MulticlassOva { .. } => {
                self.num_tree_per_iteration
            }
            _ => 1,
        };
        if num_classes == 1 && self.num_tree_per_iteration != 1 {
            return Err(EsMlError::model_parse(format!(
                "objective {} with {} trees per iteration",
                self.objective.name, self.num_tree_per_iteration
            )));
        }

        let scale = kind.leaf_scale();
        let trees: Vec<Tree> = self
            .trees
            .iter()
            .enumerate()
            .map(|(i, tree)| {
                Ok(tree
                    .to_tree(feature_names, i % num_classes, num_classes, scale)?
                    .with_target_type(target_type))
            })
            .collect::<Result<_>>()?;

        let weights = vec![self.tree_weight(); trees.len()];
        let aggregate_output = match kind {
            LgbObjectiveKind::Identity => AggregateOutput::WeightedSum { weights },
            LgbObjectiveKind::Exponential => AggregateOutput::Exponent { weights },
            _ => AggregateOutput::LogisticRegression { weights },
        };
        log::debug!(
            "Converted lightgbm {} booster with {} trees",
            self.objective.name,
            trees.len()
        );

        Ok(Ensemble::new(feature_names.to_vec(), trees, aggregate_output)
            .with_target_type(target_type)
            .with_classification_labels(self.classification_labels())
            .into())
    }
}

impl LocalModel for LgbModel {
    fn predict_row(&self, row: &[f64]) -> Result<f64> {
        let raw = self.predict_raw(row)?;
        Ok(match self.objective_kind()? {
            LgbObjectiveKind::Identity => raw[0],
            LgbObjectiveKind::Exponential => raw[0].exp(),
            LgbObjectiveKind::CrossEntropy => sigmoid(raw[0]),
            LgbObjectiveKind::Binary { sigma } => {
                if sigmoid(sigma * raw[0]) > 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
            LgbObjectiveKind::Multiclass | LgbObjectiveKind::MulticlassOva { .. } => {
                argmax(&raw).unwrap_or(0) as f64
            }
        })
    }

    fn predict_proba_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        let mut raw = self.predict_raw(row)?;
        match self.objective_kind()? {
            LgbObjectiveKind::Binary { sigma } => {
                let p = sigmoid(sigma * raw[0]);
                Ok(vec![1.0 - p, p])
            }
            LgbObjectiveKind::Multiclass => {
                softmax(&mut raw);
                Ok(raw)
            }
            LgbObjectiveKind::MulticlassOva { sigma } => {
                Ok(raw.into_iter().map(|r| sigmoid(sigma * r)).collect())
            }
            _ => Err(EsMlError::prediction(
                "regression models do not produce class probabilities",
            )),
        }
    }
}
