//! Local models rebuilt from stored definitions.
//!
//! [`EsModel`] wraps a stored tree ensemble that can be evaluated and
//! explained locally: a `weighted_sum` regressor or a binary
//! `logistic_regression` classifier whose nodes all carry
//! `number_samples`. [`Pipeline`] puts the definition's preprocessors in
//! front of it so raw documents can be scored.

use crate::core::error::{EsMlError, Result};
use crate::core::math::sigmoid;
use crate::core::types::{Document, ModelType, TargetType};
use crate::definition::{numeric_value, TrainedModel, TrainedModelDefinition};
use crate::ensemble::{AggregateOutput, Ensemble};
use crate::preprocessing::{self, apply_all, Preprocessor};
use crate::tree::Tree;
use ndarray::{Array1, Array2};
use std::fmt;

/// A prediction of an exported model.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictedValue {
    /// Regression value, or class index when the model has no labels
    Number(f64),
    /// Class label
    Label(String),
}

impl PredictedValue {
    /// Numeric reading; labels are parsed
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PredictedValue::Number(v) => Some(*v),
            PredictedValue::Label(label) => label.trim().parse().ok(),
        }
    }
}

impl fmt::Display for PredictedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictedValue::Number(v) => write!(f, "{}", v),
            PredictedValue::Label(label) => f.write_str(label),
        }
    }
}

/// Exported tree ensemble.
#[derive(Debug, Clone, PartialEq)]
pub struct EsModel {
    ensemble: Ensemble,
}

impl EsModel {
    /// Checks that the stored model can be evaluated and explained locally.
    pub fn new(trained_model: TrainedModel) -> Result<Self> {
        let ensemble = match trained_model {
            TrainedModel::Ensemble(ensemble) => ensemble,
            TrainedModel::Tree(_) => {
                return Err(EsMlError::export("only tree ensembles can be exported"))
            }
        };
        ensemble
            .validate()
            .map_err(|e| EsMlError::export(e.to_string()))?;

        match (&ensemble.aggregate_output, ensemble.target_type) {
            (AggregateOutput::WeightedSum { .. }, TargetType::Regression) => {}
            (AggregateOutput::LogisticRegression { .. }, TargetType::Classification)
                if ensemble.leaf_width() == 1 => {}
            (aggregate, target_type) => {
                return Err(EsMlError::export(format!(
                    "unsupported aggregate_output {} for {:?} models",
                    aggregate.name(),
                    target_type
                )))
            }
        }

        if let Some(i) = ensemble.trees().position(|t| !t.has_sample_counts()) {
            return Err(EsMlError::export(format!(
                "trained model {} has nodes without number_samples",
                i
            )));
        }

        Ok(EsModel { ensemble })
    }

    /// Underlying ensemble
    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    /// Member trees
    pub fn trees(&self) -> impl Iterator<Item = &Tree> + '_ {
        self.ensemble.trees()
    }

    /// Aggregation weight of tree `i`
    pub fn tree_weight(&self, i: usize) -> f64 {
        self.ensemble.aggregate_output.weight(i)
    }

    /// Model feature names
    pub fn feature_names(&self) -> &[String] {
        &self.ensemble.feature_names
    }

    /// Number of model features
    pub fn num_features(&self) -> usize {
        self.ensemble.feature_names.len()
    }

    /// Regression or classification
    pub fn model_type(&self) -> ModelType {
        self.ensemble.target_type.into()
    }

    /// Class labels, if stored
    pub fn classification_labels(&self) -> Option<&[String]> {
        self.ensemble.classification_labels.as_deref()
    }

    /// Weighted sum of leaf values for one feature row.
    pub fn decision_function_row(&self, features: &[f64]) -> Result<f64> {
        self.check_width(features)?;
        Ok(self
            .ensemble
            .weighted_sum(features)?
            .first()
            .copied()
            .unwrap_or(0.0))
    }

    /// `[P(class 0), P(class 1)]` for one feature row.
    pub fn predict_proba_row(&self, features: &[f64]) -> Result<Vec<f64>> {
        if self.model_type() != ModelType::Classification {
            return Err(EsMlError::prediction(
                "regression models do not produce class probabilities",
            ));
        }
        let p = sigmoid(self.decision_function_row(features)?);
        Ok(vec![1.0 - p, p])
    }

    /// Prediction for one feature row.
    pub fn predict_row(&self, features: &[f64]) -> Result<PredictedValue> {
        let margin = self.decision_function_row(features)?;
        match self.model_type() {
            ModelType::Regression => Ok(PredictedValue::Number(margin)),
            ModelType::Classification => {
                let class = usize::from(sigmoid(margin) > 0.5);
                Ok(match self.classification_labels().and_then(|l| l.get(class)) {
                    Some(label) => PredictedValue::Label(label.clone()),
                    None => PredictedValue::Number(class as f64),
                })
            }
        }
    }

    fn check_width(&self, features: &[f64]) -> Result<()> {
        if features.len() != self.num_features() {
            return Err(EsMlError::dimension_mismatch(
                format!("{} features", self.num_features()),
                format!("{} features", features.len()),
            ));
        }
        Ok(())
    }
}

/// Preprocessors followed by an [`EsModel`].
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    preprocessors: Vec<Preprocessor>,
    es_model: EsModel,
}

impl Pipeline {
    /// Builds a pipeline from a decoded definition.
    pub fn from_definition(definition: TrainedModelDefinition) -> Result<Self> {
        let TrainedModelDefinition {
            preprocessors,
            trained_model,
        } = definition;
        let es_model = EsModel::new(trained_model)?;
        log::debug!(
            "Exported model with {} preprocessors and {} trees",
            preprocessors.len(),
            es_model.ensemble().num_trees()
        );
        Ok(Pipeline {
            preprocessors,
            es_model,
        })
    }

    /// Preprocessors in application order
    pub fn preprocessors(&self) -> &[Preprocessor] {
        &self.preprocessors
    }

    /// The model stage
    pub fn es_model(&self) -> &EsModel {
        &self.es_model
    }

    /// Fields a document must provide: preprocessor inputs, then model
    /// features no preprocessor produces.
    pub fn input_field_names(&self) -> Vec<String> {
        preprocessing::input_field_names(&self.preprocessors, self.es_model.feature_names())
    }

    /// Feature names the model stage reads, in column order of [`Self::transform`]
    pub fn feature_names_out(&self) -> &[String] {
        self.es_model.feature_names()
    }

    /// Runs the preprocessors; missing or non-numeric features become NaN.
    pub fn transform(&self, docs: &[Document]) -> Result<Array2<f64>> {
        let names = self.feature_names_out();
        let mut data = Vec::with_capacity(docs.len() * names.len());
        for doc in docs {
            let mut doc = doc.clone();
            apply_all(&self.preprocessors, &mut doc);
            data.extend(
                names
                    .iter()
                    .map(|name| doc.get(name).and_then(numeric_value).unwrap_or(f64::NAN)),
            );
        }
        Array2::from_shape_vec((docs.len(), names.len()), data)
            .map_err(|e| EsMlError::prediction(format!("feature matrix: {}", e)))
    }

    /// Raw margin per document.
    pub fn decision_function(&self, docs: &[Document]) -> Result<Array1<f64>> {
        let features = self.transform(docs)?;
        features
            .rows()
            .into_iter()
            .map(|row| self.es_model.decision_function_row(&row.to_vec()))
            .collect::<Result<Vec<f64>>>()
            .map(Array1::from_vec)
    }

    /// Regression values or class labels per document.
    pub fn predict(&self, docs: &[Document]) -> Result<Vec<PredictedValue>> {
        let features = self.transform(docs)?;
        features
            .rows()
            .into_iter()
            .map(|row| self.es_model.predict_row(&row.to_vec()))
            .collect()
    }

    /// Class probabilities per document.
    pub fn predict_proba(&self, docs: &[Document]) -> Result<Array2<f64>> {
        let features = self.transform(docs)?;
        let mut proba = Array2::zeros((docs.len(), 2));
        for (i, row) in features.rows().into_iter().enumerate() {
            let p = self.es_model.predict_proba_row(&row.to_vec())?;
            proba[[i, 0]] = p[0];
            proba[[i, 1]] = p[1];
        }
        Ok(proba)
    }
}
