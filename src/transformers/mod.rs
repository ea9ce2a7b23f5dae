//! Conversion of tree models into model definitions.
//!
//! Every supported model family implements two traits:
//!
//! - [`ModelTransformer`] turns the loaded model into a [`TrainedModel`]
//!   that the model store accepts.
//! - [`LocalModel`] evaluates the loaded model the way its own library
//!   does, which is the reference side of every equivalence check.
//!
//! [`SupportedModel`] dispatches over the families for callers that pick
//! the family at runtime, such as the command line tool.

pub mod lightgbm;
pub mod sklearn;
pub mod xgboost;

use crate::core::error::{EsMlError, Result};
use crate::core::types::ModelType;
use crate::definition::{TrainedModel, TrainedModelDefinition};
use crate::io::{LgbModel, SklearnModel, XgbModel};
use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// `f0`, `f1`, ... for models that carry no feature names
pub fn default_feature_names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("f{}", i)).collect()
}

/// `"0"`, `"1"`, ... for models that only know class indices
pub fn index_labels(n: usize) -> Vec<String> {
    (0..n).map(|i| i.to_string()).collect()
}

/// Converts a loaded model into a model definition.
pub trait ModelTransformer {
    /// Regression or classification
    fn model_type(&self) -> ModelType;

    /// Number of input features
    fn num_features(&self) -> usize;

    /// Number of classes; 0 for regressors
    fn num_classes(&self) -> usize;

    /// Labels of the classes in index order
    fn classification_labels(&self) -> Option<Vec<String>>;

    /// Whether the model predicts more than two classes
    fn is_multiclass(&self) -> bool {
        self.model_type() == ModelType::Classification && self.num_classes() > 2
    }

    /// Feature names stored with the model, or `f0..fn`
    fn feature_names(&self) -> Vec<String> {
        default_feature_names(self.num_features())
    }

    /// Builds the trained model section of a definition.
    fn to_trained_model(&self, feature_names: &[String]) -> Result<TrainedModel>;

    /// Builds and validates a complete definition.
    fn to_definition(&self, feature_names: &[String]) -> Result<TrainedModelDefinition> {
        if feature_names.len() != self.num_features() {
            return Err(EsMlError::dimension_mismatch(
                format!("{} feature names", self.num_features()),
                format!("{} feature names", feature_names.len()),
            ));
        }
        let definition = TrainedModelDefinition::new(self.to_trained_model(feature_names)?);
        definition.validate()?;
        Ok(definition)
    }
}

/// Evaluates a loaded model locally.
///
/// `predict_row` returns the regression value or the predicted class as a
/// number (the class value for sklearn, the class index otherwise).
pub trait LocalModel: ModelTransformer + Sync {
    /// Prediction for one row
    fn predict_row(&self, row: &[f64]) -> Result<f64>;

    /// Class probabilities for one row
    fn predict_proba_row(&self, _row: &[f64]) -> Result<Vec<f64>> {
        Err(EsMlError::prediction(
            "regression models do not produce class probabilities",
        ))
    }

    /// Predictions for every row of `data`, computed in parallel.
    fn predict(&self, data: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        check_columns(self.num_features(), &data)?;
        let predictions = (0..data.nrows())
            .into_par_iter()
            .map(|i| self.predict_row(&data.row(i).to_vec()))
            .collect::<Result<Vec<f64>>>()?;
        Ok(Array1::from_vec(predictions))
    }

    /// Class probabilities for every row of `data`.
    fn predict_proba(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        check_columns(self.num_features(), &data)?;
        let rows = (0..data.nrows())
            .into_par_iter()
            .map(|i| self.predict_proba_row(&data.row(i).to_vec()))
            .collect::<Result<Vec<Vec<f64>>>>()?;
        let width = rows.first().map_or(0, Vec::len);
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((data.nrows(), width), flat)
            .map_err(|e| EsMlError::prediction(format!("ragged class probabilities: {}", e)))
    }
}

fn check_columns(expected: usize, data: &ArrayView2<'_, f64>) -> Result<()> {
    if data.ncols() != expected {
        return Err(EsMlError::dimension_mismatch(
            format!("{} columns", expected),
            format!("{} columns", data.ncols()),
        ));
    }
    Ok(())
}

/// Model families that can be loaded from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// JSON mirror of a fitted scikit-learn estimator
    Sklearn,
    /// XGBoost JSON model
    Xgboost,
    /// LightGBM text model
    Lightgbm,
}

impl FromStr for ModelKind {
    type Err = EsMlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sklearn" | "scikit-learn" => Ok(ModelKind::Sklearn),
            "xgboost" | "xgb" => Ok(ModelKind::Xgboost),
            "lightgbm" | "lgbm" => Ok(ModelKind::Lightgbm),
            other => Err(EsMlError::invalid_parameter(
                "model_kind",
                other,
                "must be one of sklearn, xgboost, lightgbm",
            )),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelKind::Sklearn => "sklearn",
            ModelKind::Xgboost => "xgboost",
            ModelKind::Lightgbm => "lightgbm",
        })
    }
}

/// A model of any supported family.
#[derive(Debug, Clone)]
pub enum SupportedModel {
    /// scikit-learn tree or forest
    Sklearn(SklearnModel),
    /// XGBoost booster
    Xgboost(XgbModel),
    /// LightGBM booster
    Lightgbm(LgbModel),
}

impl SupportedModel {
    /// Loads a model file of the given family.
    pub fn load<P: AsRef<Path>>(kind: ModelKind, path: P) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Loading {} model from {}", kind, path.display());
        Ok(match kind {
            ModelKind::Sklearn => SupportedModel::Sklearn(SklearnModel::from_file(path)?),
            ModelKind::Xgboost => SupportedModel::Xgboost(XgbModel::from_file(path)?),
            ModelKind::Lightgbm => SupportedModel::Lightgbm(LgbModel::from_file(path)?),
        })
    }

    /// Family of the model
    pub fn kind(&self) -> ModelKind {
        match self {
            SupportedModel::Sklearn(_) => ModelKind::Sklearn,
            SupportedModel::Xgboost(_) => ModelKind::Xgboost,
            SupportedModel::Lightgbm(_) => ModelKind::Lightgbm,
        }
    }

    fn inner(&self) -> &dyn LocalModel {
        match self {
            SupportedModel::Sklearn(m) => m,
            SupportedModel::Xgboost(m) => m,
            SupportedModel::Lightgbm(m) => m,
        }
    }
}

impl ModelTransformer for SupportedModel {
    fn model_type(&self) -> ModelType {
        self.inner().model_type()
    }

    fn num_features(&self) -> usize {
        self.inner().num_features()
    }

    fn num_classes(&self) -> usize {
        self.inner().num_classes()
    }

    fn classification_labels(&self) -> Option<Vec<String>> {
        self.inner().classification_labels()
    }

    fn feature_names(&self) -> Vec<String> {
        self.inner().feature_names()
    }

    fn to_trained_model(&self, feature_names: &[String]) -> Result<TrainedModel> {
        self.inner().to_trained_model(feature_names)
    }
}

impl LocalModel for SupportedModel {
    fn predict_row(&self, row: &[f64]) -> Result<f64> {
        self.inner().predict_row(row)
    }

    fn predict_proba_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        self.inner().predict_proba_row(row)
    }
}
