//! Tree ensembles of the model-definition format.
//!
//! An [`Ensemble`] evaluates each member tree and combines the leaf values
//! with its [`AggregateOutput`]. Weighted sums, logistic regression and
//! exponentiation work on raw leaf values; weighted mode counts class votes.

use crate::core::error::{EsMlError, Result};
use crate::core::math::{argmax, sigmoid, softmax, softmax_copy};
use crate::core::types::TargetType;
use crate::invalid_definition;
use crate::tree::Tree;
use serde::{Deserialize, Serialize};

/// How the outputs of the member trees are combined.
///
/// Serialized externally tagged, e.g. `{"weighted_sum": {"weights": [...]}}`.
/// Empty `weights` means every tree has weight 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOutput {
    /// Elementwise weighted sum of leaf values
    WeightedSum {
        /// Per-tree weights
        #[serde(default)]
        weights: Vec<f64>,
    },
    /// Weighted class votes, soft-maxed
    WeightedMode {
        /// Per-tree weights
        #[serde(default)]
        weights: Vec<f64>,
        /// Number of classes voted on
        num_classes: usize,
    },
    /// Sigmoid of a scalar weighted sum, softmax of a vector one
    LogisticRegression {
        /// Per-tree weights
        #[serde(default)]
        weights: Vec<f64>,
    },
    /// `exp` of the weighted sum
    Exponent {
        /// Per-tree weights
        #[serde(default)]
        weights: Vec<f64>,
    },
}

impl AggregateOutput {
    /// Weighted sum with weights `1/n`
    pub fn average(num_trees: usize) -> Self {
        AggregateOutput::WeightedSum {
            weights: uniform_weights(num_trees),
        }
    }

    /// Per-tree weights as stored (possibly empty)
    pub fn weights(&self) -> &[f64] {
        match self {
            AggregateOutput::WeightedSum { weights }
            | AggregateOutput::WeightedMode { weights, .. }
            | AggregateOutput::LogisticRegression { weights }
            | AggregateOutput::Exponent { weights } => weights,
        }
    }

    /// Weight of tree `i`
    pub fn weight(&self, i: usize) -> f64 {
        self.weights().get(i).copied().unwrap_or(1.0)
    }

    /// Name used in the serialized form
    pub fn name(&self) -> &'static str {
        match self {
            AggregateOutput::WeightedSum { .. } => "weighted_sum",
            AggregateOutput::WeightedMode { .. } => "weighted_mode",
            AggregateOutput::LogisticRegression { .. } => "logistic_regression",
            AggregateOutput::Exponent { .. } => "exponent",
        }
    }

    /// Whether this aggregator may be combined with `target_type`
    pub fn supports(&self, target_type: TargetType) -> bool {
        match self {
            AggregateOutput::WeightedSum { .. } | AggregateOutput::Exponent { .. } => {
                target_type == TargetType::Regression
            }
            AggregateOutput::WeightedMode { .. } => target_type == TargetType::Classification,
            AggregateOutput::LogisticRegression { .. } => true,
        }
    }
}

/// `n` weights of `1/n`.
pub fn uniform_weights(n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    vec![1.0 / n as f64; n]
}

/// Ensemble member, serialized as `{"tree": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleMember {
    /// A decision tree
    Tree(Tree),
}

impl EnsembleMember {
    /// The member tree
    pub fn tree(&self) -> &Tree {
        match self {
            EnsembleMember::Tree(tree) => tree,
        }
    }
}

impl From<Tree> for EnsembleMember {
    fn from(tree: Tree) -> Self {
        EnsembleMember::Tree(tree)
    }
}

/// Ensemble as serialized under `{"ensemble": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ensemble {
    /// Feature names shared by all members
    pub feature_names: Vec<String>,
    /// Member trees
    pub trained_models: Vec<EnsembleMember>,
    /// Combination of member outputs
    pub aggregate_output: AggregateOutput,
    /// Output interpretation
    #[serde(default)]
    pub target_type: TargetType,
    /// Labels for class indices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification_labels: Option<Vec<String>>,
    /// Per-class multipliers applied when picking the winning class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification_weights: Option<Vec<f64>>,
}

impl Ensemble {
    /// Creates a regression ensemble.
    pub fn new(feature_names: Vec<String>, trees: Vec<Tree>, aggregate_output: AggregateOutput) -> Self {
        Ensemble {
            feature_names,
            trained_models: trees.into_iter().map(EnsembleMember::from).collect(),
            aggregate_output,
            target_type: TargetType::Regression,
            classification_labels: None,
            classification_weights: None,
        }
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

    /// Sets the classification weights.
    pub fn with_classification_weights(mut self, weights: Option<Vec<f64>>) -> Self {
        self.classification_weights = weights;
        self
    }

    /// Iterates over the member trees.
    pub fn trees(&self) -> impl Iterator<Item = &Tree> + '_ {
        self.trained_models.iter().map(EnsembleMember::tree)
    }

    /// Number of member trees.
    pub fn num_trees(&self) -> usize {
        self.trained_models.len()
    }

    /// Width of the member leaves.
    pub fn leaf_width(&self) -> usize {
        self.trees().map(Tree::leaf_width).max().unwrap_or(0)
    }

    /// Number of classes the ensemble predicts.
    pub fn num_classes(&self) -> usize {
        if let Some(labels) = &self.classification_labels {
            return labels.len();
        }
        match &self.aggregate_output {
            AggregateOutput::WeightedMode { num_classes, .. } => *num_classes,
            _ => match self.leaf_width() {
                1 => 2,
                width => width,
            },
        }
    }

    /// Checks the ensemble and every member.
    pub fn validate(&self) -> Result<()> {
        if self.trained_models.is_empty() {
            return Err(invalid_definition!("ensemble has no trained models"));
        }

        let weights = self.aggregate_output.weights();
        if !weights.is_empty() && weights.len() != self.trained_models.len() {
            return Err(invalid_definition!(
                "{} has {} weights for {} trained models",
                self.aggregate_output.name(),
                weights.len(),
                self.trained_models.len()
            ));
        }
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(invalid_definition!("aggregate_output weights must be finite"));
        }

        if !self.aggregate_output.supports(self.target_type) {
            return Err(invalid_definition!(
                "aggregate_output {} does not support target_type {:?}",
                self.aggregate_output.name(),
                self.target_type
            ));
        }

        let num_features = self.feature_names.len();
        let mut width = None;
        for (i, tree) in self.trees().enumerate() {
            tree.validate(num_features)
                .map_err(|e| invalid_definition!("trained model {}: {}", i, e))?;
            let w = tree.leaf_width();
            match width {
                None => width = Some(w),
                Some(expected) if expected != w => {
                    return Err(invalid_definition!(
                        "trained model {} has leaves of width {}, expected {}",
                        i,
                        w,
                        expected
                    ));
                }
                Some(_) => {}
            }
        }

        if let AggregateOutput::WeightedMode { num_classes, .. } = &self.aggregate_output {
            if *num_classes < 2 {
                return Err(invalid_definition!("weighted_mode needs at least 2 classes"));
            }
        }

        if let Some(class_weights) = &self.classification_weights {
            let labels = self.classification_labels.as_ref().ok_or_else(|| {
                invalid_definition!("classification_weights require classification_labels")
            })?;
            if class_weights.len() != labels.len() {
                return Err(invalid_definition!(
                    "{} classification_weights for {} classification_labels",
                    class_weights.len(),
                    labels.len()
                ));
            }
        }

        if self.target_type == TargetType::Classification {
            if let Some(labels) = &self.classification_labels {
                let width = self.leaf_width();
                if width > 1 && labels.len() != width {
                    return Err(invalid_definition!(
                        "{} classification_labels for leaves of width {}",
                        labels.len(),
                        width
                    ));
                }
            }
        }

        Ok(())
    }

    /// Elementwise weighted sum of the member leaf values.
    pub fn weighted_sum(&self, features: &[f64]) -> Result<Vec<f64>> {
        let mut sum = vec![0.0; self.leaf_width()];
        for (i, tree) in self.trees().enumerate() {
            let weight = self.aggregate_output.weight(i);
            let leaf = tree.predict_raw(features)?;
            if leaf.len() > sum.len() {
                return Err(EsMlError::prediction(format!(
                    "tree {} produced {} values, expected at most {}",
                    i,
                    leaf.len(),
                    sum.len()
                )));
            }
            for (acc, value) in sum.iter_mut().zip(leaf) {
                *acc += weight * value;
            }
        }
        Ok(sum)
    }

    /// Weighted class votes of the member trees.
    fn weighted_votes(&self, features: &[f64], num_classes: usize) -> Result<Vec<f64>> {
        let mut votes = vec![0.0; num_classes];
        for (i, tree) in self.trees().enumerate() {
            let leaf = tree.predict_raw(features)?;
            let class = match leaf {
                [single] => single.round().max(0.0) as usize,
                values => argmax(values).unwrap_or(0),
            };
            let slot = votes.get_mut(class).ok_or_else(|| {
                EsMlError::prediction(format!(
                    "tree {} voted for class {} of {}",
                    i, class, num_classes
                ))
            })?;
            *slot += self.aggregate_output.weight(i);
        }
        Ok(votes)
    }

    /// Regression output.
    pub fn predict_value(&self, features: &[f64]) -> Result<f64> {
        match &self.aggregate_output {
            AggregateOutput::WeightedSum { .. } => Ok(first(&self.weighted_sum(features)?)),
            AggregateOutput::Exponent { .. } => Ok(first(&self.weighted_sum(features)?).exp()),
            AggregateOutput::LogisticRegression { .. } => {
                Ok(sigmoid(first(&self.weighted_sum(features)?)))
            }
            AggregateOutput::WeightedMode { .. } => Err(EsMlError::prediction(
                "weighted_mode ensembles do not produce regression values",
            )),
        }
    }

    /// Class probabilities.
    pub fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>> {
        match &self.aggregate_output {
            AggregateOutput::LogisticRegression { .. } => {
                let sum = self.weighted_sum(features)?;
                if sum.len() == 1 {
                    let p = sigmoid(sum[0]);
                    Ok(vec![1.0 - p, p])
                } else {
                    Ok(softmax_copy(&sum))
                }
            }
            AggregateOutput::WeightedMode { num_classes, .. } => {
                let mut votes = self.weighted_votes(features, *num_classes)?;
                softmax(&mut votes);
                Ok(votes)
            }
            other => Err(EsMlError::prediction(format!(
                "{} ensembles do not produce class probabilities",
                other.name()
            ))),
        }
    }

    /// Raw margin before the output transformation.
    pub fn decision_function(&self, features: &[f64]) -> Result<Vec<f64>> {
        match &self.aggregate_output {
            AggregateOutput::WeightedMode { num_classes, .. } => {
                self.weighted_votes(features, *num_classes)
            }
            _ => self.weighted_sum(features),
        }
    }
}

fn first(values: &[f64]) -> f64 {
    values.first().copied().unwrap_or(0.0)
}
