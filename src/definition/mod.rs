//! Trained model definitions.
//!
//! A [`TrainedModelDefinition`] is what gets uploaded to the remote model
//! store: optional preprocessors followed by a single tree or an ensemble of
//! trees. Definitions can be validated before upload and evaluated locally,
//! which the export path builds on.

pub mod inference;

pub use inference::{
    numeric_value, ClassificationConfig, ClassificationResult, InferenceConfig, InferenceResult,
    RegressionConfig, TopClass,
};

use crate::core::error::{EsMlError, Result};
use crate::core::math::{argmax, softmax_copy};
use crate::core::types::{Document, ModelType, TargetType};
use crate::ensemble::Ensemble;
use crate::invalid_definition;
use crate::preprocessing::{self, apply_all, Preprocessor};
use crate::tree::Tree;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// The model part of a definition, `{"tree": ...}` or `{"ensemble": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainedModel {
    /// A single decision tree
    Tree(Tree),
    /// An ensemble of trees
    Ensemble(Ensemble),
}

impl From<Tree> for TrainedModel {
    fn from(tree: Tree) -> Self {
        TrainedModel::Tree(tree)
    }
}

impl From<Ensemble> for TrainedModel {
    fn from(ensemble: Ensemble) -> Self {
        TrainedModel::Ensemble(ensemble)
    }
}

impl TrainedModel {
    /// Feature names the model reads
    pub fn feature_names(&self) -> &[String] {
        match self {
            TrainedModel::Tree(t) => &t.feature_names,
            TrainedModel::Ensemble(e) => &e.feature_names,
        }
    }

    /// Output interpretation
    pub fn target_type(&self) -> TargetType {
        match self {
            TrainedModel::Tree(t) => t.target_type,
            TrainedModel::Ensemble(e) => e.target_type,
        }
    }

    /// Regression or classification
    pub fn model_type(&self) -> ModelType {
        self.target_type().into()
    }

    /// Labels for class indices
    pub fn classification_labels(&self) -> Option<&[String]> {
        match self {
            TrainedModel::Tree(t) => t.classification_labels.as_deref(),
            TrainedModel::Ensemble(e) => e.classification_labels.as_deref(),
        }
    }

    /// Per-class multipliers used to pick the winning class
    pub fn classification_weights(&self) -> Option<&[f64]> {
        match self {
            TrainedModel::Tree(_) => None,
            TrainedModel::Ensemble(e) => e.classification_weights.as_deref(),
        }
    }

    /// Number of classes for classification models
    pub fn num_classes(&self) -> usize {
        match self {
            TrainedModel::Tree(t) => match (&t.classification_labels, t.leaf_width()) {
                (Some(labels), _) => labels.len(),
                (None, 1) => (t.highest_class_index() + 1).max(2),
                (None, width) => width,
            },
            TrainedModel::Ensemble(e) => e.num_classes(),
        }
    }

    /// Checks the structure of the model.
    pub fn validate(&self) -> Result<()> {
        match self {
            TrainedModel::Tree(t) => t.validate(t.feature_names.len()),
            TrainedModel::Ensemble(e) => e.validate(),
        }
    }

    /// Raw output before the output transformation.
    pub fn decision_function(&self, features: &[f64]) -> Result<Vec<f64>> {
        match self {
            TrainedModel::Tree(t) => Ok(t.predict_raw(features)?.to_vec()),
            TrainedModel::Ensemble(e) => e.decision_function(features),
        }
    }

    /// Regression output.
    pub fn predict_value(&self, features: &[f64]) -> Result<f64> {
        match self {
            TrainedModel::Tree(t) => t
                .predict_raw(features)?
                .first()
                .copied()
                .ok_or_else(|| EsMlError::prediction("empty leaf value")),
            TrainedModel::Ensemble(e) => e.predict_value(features),
        }
    }

    /// Class probabilities.
    pub fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>> {
        match self {
            TrainedModel::Tree(t) => {
                let leaf = t.predict_raw(features)?;
                if leaf.len() > 1 {
                    return Ok(softmax_copy(leaf));
                }
                let num_classes = self.num_classes();
                let class = leaf.first().copied().unwrap_or(0.0).round().max(0.0) as usize;
                if class >= num_classes {
                    return Err(EsMlError::prediction(format!(
                        "leaf predicts class {} of {}",
                        class, num_classes
                    )));
                }
                let mut probabilities = vec![0.0; num_classes];
                probabilities[class] = 1.0;
                Ok(probabilities)
            }
            TrainedModel::Ensemble(e) => e.predict_proba(features),
        }
    }

    /// Evaluates the model on a feature vector aligned with
    /// [`Self::feature_names`].
    pub fn infer(&self, features: &[f64]) -> Result<InferenceResult> {
        if features.len() != self.feature_names().len() {
            return Err(EsMlError::dimension_mismatch(
                format!("{} features", self.feature_names().len()),
                format!("{} features", features.len()),
            ));
        }

        match self.model_type() {
            ModelType::Regression => Ok(InferenceResult::Regression {
                value: self.predict_value(features)?,
            }),
            ModelType::Classification => {
                let probabilities = self.predict_proba(features)?;
                Ok(InferenceResult::Classification(self.classify(&probabilities)?))
            }
        }
    }

    fn classify(&self, probabilities: &[f64]) -> Result<ClassificationResult> {
        let weights = self.classification_weights();
        let labels = self.classification_labels();
        let scores: Vec<f64> = probabilities
            .iter()
            .enumerate()
            .map(|(i, p)| p * weights.and_then(|w| w.get(i)).copied().unwrap_or(1.0))
            .collect();
        let class_index =
            argmax(&scores).ok_or_else(|| EsMlError::prediction("no class probabilities"))?;

        let class_name = |i: usize| -> Value {
            match labels.and_then(|l| l.get(i)) {
                Some(label) => Value::from(label.clone()),
                None => Value::from(i as f64),
            }
        };

        let mut order: Vec<usize> = (0..probabilities.len()).collect();
        order.sort_by(|&a, &b| {
            probabilities[b]
                .partial_cmp(&probabilities[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let top_classes = order
            .into_iter()
            .map(|i| TopClass {
                class_name: class_name(i),
                class_probability: probabilities[i],
                class_score: scores[i],
            })
            .collect();

        Ok(ClassificationResult {
            class_index,
            label: labels.and_then(|l| l.get(class_index)).cloned(),
            probability: probabilities[class_index],
            score: scores[class_index],
            top_classes,
        })
    }
}

/// Complete model definition as uploaded to the model store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModelDefinition {
    /// Preprocessors applied before the model
    #[serde(default)]
    pub preprocessors: Vec<Preprocessor>,
    /// The model
    pub trained_model: TrainedModel,
}

impl TrainedModelDefinition {
    /// Definition without preprocessors.
    pub fn new<M: Into<TrainedModel>>(trained_model: M) -> Self {
        TrainedModelDefinition {
            preprocessors: Vec::new(),
            trained_model: trained_model.into(),
        }
    }

    /// Sets the preprocessors.
    pub fn with_preprocessors(mut self, preprocessors: Vec<Preprocessor>) -> Self {
        self.preprocessors = preprocessors;
        self
    }

    /// Feature names the model reads
    pub fn feature_names(&self) -> &[String] {
        self.trained_model.feature_names()
    }

    /// Regression or classification
    pub fn model_type(&self) -> ModelType {
        self.trained_model.model_type()
    }

    /// Fields a document must provide: preprocessor inputs followed by model
    /// features no preprocessor produces.
    pub fn input_field_names(&self) -> Vec<String> {
        preprocessing::input_field_names(&self.preprocessors, self.feature_names())
    }

    /// Checks the model and the preprocessors.
    pub fn validate(&self) -> Result<()> {
        self.trained_model.validate()?;

        let mut outputs = HashSet::new();
        for p in &self.preprocessors {
            for feature in p.output_features() {
                if !outputs.insert(feature.clone()) {
                    return Err(invalid_definition!(
                        "feature {} is produced by more than one preprocessor",
                        feature
                    ));
                }
            }
        }
        Ok(())
    }

    /// Runs the preprocessors and extracts the model features from `doc`.
    ///
    /// Missing or non-numeric features become `NaN`.
    pub fn feature_vector(&self, doc: &Document) -> Vec<f64> {
        let processed;
        let doc = if self.preprocessors.is_empty() {
            doc
        } else {
            let mut copy = doc.clone();
            apply_all(&self.preprocessors, &mut copy);
            processed = copy;
            &processed
        };

        self.feature_names()
            .iter()
            .map(|name| doc.get(name).and_then(numeric_value).unwrap_or(f64::NAN))
            .collect()
    }

    /// Evaluates the definition on a document.
    pub fn infer_document(&self, doc: &Document) -> Result<InferenceResult> {
        self.trained_model.infer(&self.feature_vector(doc))
    }
}
