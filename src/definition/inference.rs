//! Inference configuration and results.
//!
//! [`InferenceConfig`] is sent with uploads and inference processors;
//! [`InferenceResult`] is what evaluating a definition on one document
//! produces, shaped like the fields the inference processor writes.

use crate::core::constants::*;
use crate::core::types::{Document, ModelType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Options for regression inference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// Field the prediction is written to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_field: Option<String>,
    /// Number of feature importance values to return
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_top_feature_importance_values: Option<u32>,
}

/// Options for classification inference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Field the prediction is written to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_field: Option<String>,
    /// Number of top classes to return; `-1` returns all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_top_classes: Option<i32>,
    /// Field the top classes are written to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_classes_results_field: Option<String>,
    /// Number of feature importance values to return
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_top_feature_importance_values: Option<u32>,
}

/// `inference_config` object: `{"regression": {}}` or `{"classification": {}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceConfig {
    /// Regression inference
    Regression(RegressionConfig),
    /// Classification inference
    Classification(ClassificationConfig),
}

impl InferenceConfig {
    /// Default configuration for a model type
    pub fn for_model_type(model_type: ModelType) -> Self {
        match model_type {
            ModelType::Regression => InferenceConfig::Regression(RegressionConfig::default()),
            ModelType::Classification => {
                InferenceConfig::Classification(ClassificationConfig::default())
            }
        }
    }

    /// The model type this configuration applies to
    pub fn model_type(&self) -> ModelType {
        match self {
            InferenceConfig::Regression(_) => ModelType::Regression,
            InferenceConfig::Classification(_) => ModelType::Classification,
        }
    }

    /// Requested number of top classes (0 for regression)
    pub fn num_top_classes(&self) -> i32 {
        match self {
            InferenceConfig::Classification(c) => c.num_top_classes.unwrap_or(0),
            InferenceConfig::Regression(_) => 0,
        }
    }
}

/// One entry of `top_classes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopClass {
    /// Label, or class index when the model has no labels
    pub class_name: Value,
    /// Class probability
    pub class_probability: f64,
    /// Probability times class weight
    pub class_score: f64,
}

/// Outcome of a classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    /// Index of the winning class
    pub class_index: usize,
    /// Label of the winning class
    pub label: Option<String>,
    /// Probability of the winning class
    pub probability: f64,
    /// Weighted score of the winning class
    pub score: f64,
    /// Every class, most probable first
    pub top_classes: Vec<TopClass>,
}

/// Result of evaluating a model on one document.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceResult {
    /// Numeric prediction
    Regression {
        /// Predicted value
        value: f64,
    },
    /// Class prediction
    Classification(ClassificationResult),
}

impl InferenceResult {
    /// `predicted_value` as written by the inference processor.
    ///
    /// Classification results use the label when one exists and the class
    /// index otherwise.
    pub fn predicted_value(&self) -> Value {
        match self {
            InferenceResult::Regression { value } => Value::from(*value),
            InferenceResult::Classification(c) => match &c.label {
                Some(label) => Value::from(label.clone()),
                None => Value::from(c.class_index as f64),
            },
        }
    }

    /// Numeric form of [`Self::predicted_value`].
    pub fn predicted_number(&self) -> Option<f64> {
        numeric_value(&self.predicted_value())
    }

    /// Result fields as a document.
    ///
    /// `num_top_classes` follows the classification option: 0 omits
    /// `top_classes`, negative values include every class.
    pub fn to_document(&self, num_top_classes: i32) -> Document {
        let mut doc = Document::new();
        doc.insert(PREDICTED_VALUE_FIELD.to_string(), self.predicted_value());
        if let InferenceResult::Classification(c) = self {
            doc.insert(
                PREDICTION_PROBABILITY_FIELD.to_string(),
                Value::from(c.probability),
            );
            doc.insert(PREDICTION_SCORE_FIELD.to_string(), Value::from(c.score));
            if num_top_classes != 0 {
                let n = if num_top_classes < 0 {
                    c.top_classes.len()
                } else {
                    num_top_classes as usize
                };
                let top: Vec<&TopClass> = c.top_classes.iter().take(n).collect();
                if let Ok(value) = serde_json::to_value(top) {
                    doc.insert(TOP_CLASSES_FIELD.to_string(), value);
                }
            }
        }
        doc
    }
}

/// Numeric reading of a field or prediction value.
///
/// Numbers are used as-is, numeric strings are parsed and booleans map to
/// 1 and 0. Anything else is treated as missing.
pub fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
