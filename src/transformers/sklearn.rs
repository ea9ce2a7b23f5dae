//! scikit-learn decision trees and random forests.
//!
//! Nodes split with `x <= threshold`. Inputs are compared in single
//! precision, like sklearn's own `predict`. Missing values go right unless
//! the node learned `missing_go_to_left`. Sample counts are kept as
//! `number_samples` so stored forests can be exported again.

use super::{LocalModel, ModelTransformer};
use crate::core::error::{EsMlError, Result};
use crate::core::math::argmax;
use crate::core::types::{ModelType, TargetType};
use crate::definition::TrainedModel;
use crate::ensemble::{uniform_weights, AggregateOutput, Ensemble};
use crate::io::sklearn::{SklearnModel, SklearnTree};
use crate::tree::{DecisionType, Tree, TreeNode};

/// Formats a class value the way sklearn prints integer classes.
pub fn class_label(class: f64) -> String {
    if class.is_finite() && class.fract() == 0.0 {
        format!("{}", class as i64)
    } else {
        class.to_string()
    }
}

/// Leaf value as emitted: the mean for regressors, class fractions for classifiers.
fn leaf_output(value: &[f64], classifier: bool) -> Vec<f64> {
    if !classifier {
        return vec![value.first().copied().unwrap_or(0.0)];
    }
    let total: f64 = value.iter().sum();
    if total > 0.0 {
        value.iter().map(|v| v / total).collect()
    } else {
        vec![1.0 / value.len() as f64; value.len()]
    }
}

impl SklearnTree {
    /// Converts the fitted arrays into a definition tree.
    pub fn to_tree(&self, feature_names: &[String], classifier: bool) -> Tree {
        let nodes = (0..self.node_count())
            .map(|i| {
                let node = if self.is_leaf(i) {
                    TreeNode::leaf(i, leaf_output(&self.value[i], classifier))
                } else {
                    TreeNode::split(
                        i,
                        self.feature[i] as usize,
                        self.threshold[i],
                        DecisionType::Lte,
                        self.missing_left(i),
                        self.children_left[i] as usize,
                        self.children_right[i] as usize,
                    )
                };
                node.with_number_samples(self.n_node_samples[i])
            })
            .collect();
        Tree::new(feature_names.to_vec(), nodes)
    }

    /// Index of the leaf reached by `row`.
    pub fn apply(&self, row: &[f64]) -> Result<usize> {
        let mut node = 0;
        for _ in 0..self.node_count() {
            if self.is_leaf(node) {
                return Ok(node);
            }
            let feature = self.feature[node] as usize;
            let value = *row.get(feature).ok_or_else(|| {
                EsMlError::dimension_mismatch(
                    format!("at least {} features", feature + 1),
                    format!("{} features", row.len()),
                )
            })?;
            let go_left = if value.is_nan() {
                self.missing_left(node)
            } else {
                (value as f32) as f64 <= self.threshold[node]
            };
            node = if go_left {
                self.children_left[node]
            } else {
                self.children_right[node]
            } as usize;
        }
        Err(EsMlError::prediction("sklearn tree traversal did not reach a leaf"))
    }

    /// Leaf output reached by `row`.
    pub fn predict_leaf(&self, row: &[f64], classifier: bool) -> Result<Vec<f64>> {
        Ok(leaf_output(&self.value[self.apply(row)?], classifier))
    }
}

impl SklearnModel {
    fn trees(&self) -> Vec<&SklearnTree> {
        match self {
            SklearnModel::DecisionTreeClassifier(m) => vec![&m.tree],
            SklearnModel::DecisionTreeRegressor(m) => vec![&m.tree],
            SklearnModel::RandomForestClassifier(m) => m.estimators.iter().collect(),
            SklearnModel::RandomForestRegressor(m) => m.estimators.iter().collect(),
        }
    }

    fn classes(&self) -> Option<&[f64]> {
        match self {
            SklearnModel::DecisionTreeClassifier(m) => Some(m.classes.as_slice()),
            SklearnModel::RandomForestClassifier(m) => Some(m.classes.as_slice()),
            _ => None,
        }
    }

    fn is_classifier(&self) -> bool {
        self.classes().is_some()
    }

    /// Averaged leaf outputs of all trees.
    fn mean_output(&self, row: &[f64]) -> Result<Vec<f64>> {
        let trees = self.trees();
        let classifier = self.is_classifier();
        let mut sum: Vec<f64> = Vec::new();
        for tree in &trees {
            let leaf = tree.predict_leaf(row, classifier)?;
            if sum.is_empty() {
                sum = vec![0.0; leaf.len()];
            }
            for (acc, v) in sum.iter_mut().zip(&leaf) {
                *acc += v;
            }
        }
        let n = trees.len() as f64;
        Ok(sum.into_iter().map(|v| v / n).collect())
    }
}

impl ModelTransformer for SklearnModel {
    fn model_type(&self) -> ModelType {
        if self.is_classifier() {
            ModelType::Classification
        } else {
            ModelType::Regression
        }
    }

    fn num_features(&self) -> usize {
        match self {
            SklearnModel::DecisionTreeClassifier(m) => m.n_features_in,
            SklearnModel::DecisionTreeRegressor(m) => m.n_features_in,
            SklearnModel::RandomForestClassifier(m) => m.n_features_in,
            SklearnModel::RandomForestRegressor(m) => m.n_features_in,
        }
    }

    fn num_classes(&self) -> usize {
        self.classes().map_or(0, <[f64]>::len)
    }

    fn classification_labels(&self) -> Option<Vec<String>> {
        self.classes()
            .map(|classes| classes.iter().map(|&c| class_label(c)).collect())
    }

    fn to_trained_model(&self, feature_names: &[String]) -> Result<TrainedModel> {
        let classifier = self.is_classifier();
        let target_type = self.model_type().target_type();
        let labels = self.classification_labels();

        match self {
            SklearnModel::DecisionTreeClassifier(m) => Ok(m
                .tree
                .to_tree(feature_names, true)
                .with_target_type(TargetType::Classification)
                .with_classification_labels(labels)
                .into()),
            SklearnModel::DecisionTreeRegressor(m) => {
                Ok(m.tree.to_tree(feature_names, false).into())
            }
            SklearnModel::RandomForestClassifier(_) | SklearnModel::RandomForestRegressor(_) => {
                let trees: Vec<Tree> = self
                    .trees()
                    .into_iter()
                    .map(|t| t.to_tree(feature_names, classifier).with_target_type(target_type))
                    .collect();
                let weights = uniform_weights(trees.len());
                let aggregate_output = if classifier {
                    AggregateOutput::LogisticRegression { weights }
                } else {
                    AggregateOutput::WeightedSum { weights }
                };
                Ok(Ensemble::new(feature_names.to_vec(), trees, aggregate_output)
                    .with_target_type(target_type)
                    .with_classification_labels(labels)
                    .into())
            }
        }
    }
}

impl LocalModel for SklearnModel {
    fn predict_row(&self, row: &[f64]) -> Result<f64> {
        let output = self.mean_output(row)?;
        match self.classes() {
            Some(classes) => {
                let class = argmax(&output)
                    .ok_or_else(|| EsMlError::prediction("empty class probabilities"))?;
                Ok(classes[class])
            }
            None => Ok(output.first().copied().unwrap_or(0.0)),
        }
    }

    fn predict_proba_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        if !self.is_classifier() {
            return Err(EsMlError::prediction(
                "regression models do not produce class probabilities",
            ));
        }
        self.mean_output(row)
    }
}
