//! Models stored in the remote model store.
//!
//! [`MLModel`] is a handle on one stored model. It is created either for an
//! existing model ([`MLModel::new`]) or by uploading a local tree model
//! ([`MLModel::import_model`]). The handle runs remote inference through an
//! ingest pipeline simulation, deletes the model, and exports it back into a
//! local [`Pipeline`].

use crate::client::EsClient;
use crate::core::constants::{MIN_MULTICLASS_VERSION, PREDICTED_VALUE_FIELD};
use crate::core::error::{EsMlError, Result};
use crate::core::types::{Document, IfExists, ModelType};
use crate::definition::{numeric_value, InferenceConfig, TrainedModel, TrainedModelDefinition};
use crate::export::Pipeline;
use crate::io::codec::{decode_definition_value, encode_definition_with_stats};
use crate::transformers::ModelTransformer;
use ndarray::{Array1, ArrayView2};
use serde_json::{json, Value};
use std::sync::OnceLock;

/// Options for [`MLModel::import_model`].
#[derive(Debug, Clone, PartialEq)]
pub struct ImportOptions {
    /// Behaviour when the model id is already taken
    pub es_if_exists: IfExists,
    /// Upload a `compressed_definition` instead of an inline `definition`
    pub es_compress_model_definition: bool,
    /// Replaces the class labels derived from the model
    pub classification_labels: Option<Vec<String>>,
    /// Per-class weights applied when picking the winning class
    pub classification_weights: Option<Vec<f64>>,
    /// Model description stored with the configuration
    pub description: Option<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            es_if_exists: IfExists::Fail,
            es_compress_model_definition: true,
            classification_labels: None,
            classification_weights: None,
            description: None,
        }
    }
}

impl ImportOptions {
    /// Set the if-exists behaviour
    pub fn es_if_exists(mut self, if_exists: IfExists) -> Self {
        self.es_if_exists = if_exists;
        self
    }

    /// Set definition compression
    pub fn es_compress_model_definition(mut self, compress: bool) -> Self {
        self.es_compress_model_definition = compress;
        self
    }

    /// Set class labels
    pub fn classification_labels(mut self, labels: Vec<String>) -> Self {
        self.classification_labels = Some(labels);
        self
    }

    /// Set class weights
    pub fn classification_weights(mut self, weights: Vec<f64>) -> Self {
        self.classification_weights = Some(weights);
        self
    }

    /// Set the description
    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Settings read from the stored model configuration.
#[derive(Debug, Clone)]
struct StoredConfig {
    model_type: ModelType,
    feature_names: Vec<String>,
}

/// Handle on a model in the remote model store.
#[derive(Debug, Clone)]
pub struct MLModel {
    client: EsClient,
    model_id: String,
    config: OnceLock<StoredConfig>,
}

impl MLModel {
    /// Handle on an existing model. Nothing is fetched until needed.
    pub fn new<S: Into<String>>(client: EsClient, model_id: S) -> Self {
        MLModel {
            client,
            model_id: model_id.into(),
            config: OnceLock::new(),
        }
    }

    /// Converts `model`, uploads it under `model_id` and returns its handle.
    ///
    /// `feature_names` name the model's input columns in order.
    pub fn import_model<M>(
        client: EsClient,
        model_id: &str,
        model: &M,
        feature_names: &[String],
        options: ImportOptions,
    ) -> Result<Self>
    where
        M: ModelTransformer + ?Sized,
    {
        if feature_names.len() != model.num_features() {
            return Err(EsMlError::invalid_parameter(
                "feature_names",
                format!("{} names", feature_names.len()),
                format!("the model has {} features", model.num_features()),
            ));
        }

        if model.is_multiclass() {
            let version = client.server_version()?;
            if version < MIN_MULTICLASS_VERSION {
                return Err(EsMlError::UnsupportedServerVersion {
                    feature: "multi-class classification".to_string(),
                    required: MIN_MULTICLASS_VERSION.to_string(),
                    actual: version.to_string(),
                });
            }
        }

        let mut trained_model = model.to_trained_model(feature_names)?;
        apply_label_overrides(&mut trained_model, &options)?;
        let definition = TrainedModelDefinition::new(trained_model);
        definition.validate()?;
        let model_type = definition.model_type();

        let es_model = MLModel::new(client, model_id);
        if es_model.exists_model()? {
            match options.es_if_exists {
                IfExists::Fail => {
                    return Err(EsMlError::ModelAlreadyExists {
                        model_id: model_id.to_string(),
                    })
                }
                IfExists::Replace => es_model.delete_model()?,
            }
        }

        let mut body = json!({
            "input": {"field_names": feature_names},
            "inference_config": InferenceConfig::for_model_type(model_type),
        });
        if options.es_compress_model_definition {
            let (encoded, stats) = encode_definition_with_stats(&definition)?;
            log::debug!("Definition compression ratio {:.3}", stats.ratio());
            body["compressed_definition"] = Value::String(encoded);
        } else {
            body["definition"] = serde_json::to_value(&definition)?;
        }
        if let Some(description) = &options.description {
            body["description"] = Value::String(description.clone());
        }

        es_model.client.ml().put_trained_model(model_id, body)?;
        log::info!("Imported {} model '{}'", model_type, model_id);

        let _ = es_model.config.set(StoredConfig {
            model_type,
            feature_names: feature_names.to_vec(),
        });
        Ok(es_model)
    }

    /// Model id
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Client used for requests
    pub fn client(&self) -> &EsClient {
        &self.client
    }

    fn stored_config(&self) -> Result<&StoredConfig> {
        if let Some(config) = self.config.get() {
            return Ok(config);
        }
        let response = self.client.ml().get_trained_models(&self.model_id, false)?;
        let config = self.first_config(&response)?;

        let inference_config = &config["inference_config"];
        let model_type = if inference_config.get("classification").is_some() {
            ModelType::Classification
        } else if inference_config.get("regression").is_some() {
            ModelType::Regression
        } else {
            return Err(EsMlError::unexpected_response(format!(
                "model '{}' has no regression or classification inference_config",
                self.model_id
            )));
        };
        let feature_names = config["input"]["field_names"]
            .as_array()
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok(self.config.get_or_init(|| StoredConfig {
            model_type,
            feature_names,
        }))
    }

    fn first_config<'v>(&self, response: &'v Value) -> Result<&'v Value> {
        response["trained_model_configs"]
            .as_array()
            .and_then(|configs| configs.first())
            .ok_or_else(|| EsMlError::ModelNotFound {
                model_id: self.model_id.clone(),
            })
    }

    /// Regression or classification
    pub fn model_type(&self) -> Result<ModelType> {
        Ok(self.stored_config()?.model_type)
    }

    /// Input field names of the stored model
    pub fn feature_names(&self) -> Result<Vec<String>> {
        Ok(self.stored_config()?.feature_names.clone())
    }

    /// Whether the model is stored.
    pub fn exists_model(&self) -> Result<bool> {
        match self.client.ml().get_trained_models(&self.model_id, false) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Deletes the model. Deleting a missing model is not an error.
    pub fn delete_model(&self) -> Result<()> {
        match self.client.ml().delete_trained_model(&self.model_id) {
            Ok(_) => {
                log::info!("Deleted model '{}'", self.model_id);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                log::debug!("Model '{}' was already deleted", self.model_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Builds the `_source` document of one feature row; NaN fields are left out.
    fn row_document(feature_names: &[String], row: &[f64]) -> Document {
        feature_names
            .iter()
            .zip(row)
            .filter(|(_, v)| !v.is_nan())
            .map(|(name, v)| (name.clone(), Value::from(*v)))
            .collect()
    }

    /// Runs documents through an inference processor and returns each
    /// document's inference results.
    pub fn predict_documents(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        let model_type = self.model_type()?;
        let body = json!({
            "pipeline": {
                "processors": [{
                    "inference": {
                        "model_id": self.model_id,
                        "inference_config": InferenceConfig::for_model_type(model_type),
                        "field_map": {},
                    }
                }]
            },
            "docs": docs.into_iter().map(|d| json!({"_source": d})).collect::<Vec<_>>(),
        });
        let response = self.client.ingest().simulate(body)?;

        let docs = response["docs"]
            .as_array()
            .ok_or_else(|| EsMlError::unexpected_response("simulate response has no docs"))?;
        if let Some(error) = docs.iter().find_map(|d| d.get("error")) {
            return Err(EsMlError::InferenceFailed {
                model_id: self.model_id.clone(),
                error: error.clone(),
            });
        }
        docs.iter()
            .map(|d| match &d["doc"]["_source"]["ml"]["inference"] {
                Value::Object(result) => Ok(result.clone()),
                _ => Err(EsMlError::unexpected_response(
                    "simulated document has no ml.inference results",
                )),
            })
            .collect()
    }

    /// Remote predictions for every row of `data`.
    ///
    /// Classification models return the predicted class label read as a
    /// number.
    pub fn predict(&self, data: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let feature_names = self.feature_names()?;
        if data.ncols() != feature_names.len() {
            return Err(EsMlError::dimension_mismatch(
                format!("{} columns", feature_names.len()),
                format!("{} columns", data.ncols()),
            ));
        }
        let docs = data
            .rows()
            .into_iter()
            .map(|row| Self::row_document(&feature_names, &row.to_vec()))
            .collect();

        let results = self.predict_documents(docs)?;
        let values = results
            .iter()
            .map(|result| {
                let value = result.get(PREDICTED_VALUE_FIELD).ok_or_else(|| {
                    EsMlError::unexpected_response("inference result has no predicted_value")
                })?;
                numeric_value(value).ok_or_else(|| {
                    EsMlError::unexpected_response(format!(
                        "predicted_value {} is not numeric",
                        value
                    ))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        Ok(Array1::from_vec(values))
    }

    /// Remote prediction for a single feature vector.
    pub fn predict_row(&self, row: &[f64]) -> Result<f64> {
        let data = ArrayView2::from_shape((1, row.len()), row)
            .map_err(|e| EsMlError::prediction(format!("invalid feature vector: {}", e)))?;
        Ok(self.predict(data)?[0])
    }

    /// Runs the model on documents with the infer API and returns
    /// `inference_results`.
    pub fn infer_documents(&self, docs: &[Document]) -> Result<Vec<Value>> {
        let response = self.client.ml().infer_trained_model(&self.model_id, docs)?;
        response["inference_results"]
            .as_array()
            .cloned()
            .ok_or_else(|| EsMlError::unexpected_response("infer response has no inference_results"))
    }

    /// Downloads and decodes the stored definition.
    pub fn definition(&self) -> Result<TrainedModelDefinition> {
        let response = self.client.ml().get_trained_models(&self.model_id, true)?;
        let config = self.first_config(&response)?;
        let encoded = config
            .get("compressed_definition")
            .or_else(|| config.get("definition"))
            .ok_or_else(|| {
                EsMlError::unexpected_response(format!(
                    "model '{}' was returned without its definition",
                    self.model_id
                ))
            })?;
        decode_definition_value(encoded)
    }

    /// Rebuilds the stored model as a local [`Pipeline`].
    pub fn export_model(&self) -> Result<Pipeline> {
        Pipeline::from_definition(self.definition()?)
    }
}

fn apply_label_overrides(model: &mut TrainedModel, options: &ImportOptions) -> Result<()> {
    if options.classification_labels.is_none() && options.classification_weights.is_none() {
        return Ok(());
    }
    if model.model_type() != ModelType::Classification {
        return Err(EsMlError::invalid_parameter(
            "classification_labels",
            "set",
            "only classification models take class labels or weights",
        ));
    }
    match model {
        TrainedModel::Tree(tree) => {
            if options.classification_weights.is_some() {
                return Err(EsMlError::invalid_parameter(
                    "classification_weights",
                    "set",
                    "single trees do not take class weights",
                ));
            }
            if let Some(labels) = &options.classification_labels {
                tree.classification_labels = Some(labels.clone());
            }
        }
        TrainedModel::Ensemble(ensemble) => {
            if let Some(labels) = &options.classification_labels {
                ensemble.classification_labels = Some(labels.clone());
            }
            if let Some(weights) = &options.classification_weights {
                ensemble.classification_weights = Some(weights.clone());
            }
        }
    }
    Ok(())
}
