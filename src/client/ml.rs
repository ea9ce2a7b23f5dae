//! Machine learning APIs: trained models and data frame analytics.

use super::{EsClient, Request};
use crate::core::constants::{DATA_FRAME_ANALYTICS_PATH, TRAINED_MODELS_PATH};
use crate::core::error::Result;
use crate::core::types::Document;
use serde_json::{json, Value};

/// Machine learning namespace of [`EsClient`]
#[derive(Debug, Clone, Copy)]
pub struct MlClient<'a> {
    client: &'a EsClient,
}

impl<'a> MlClient<'a> {
    pub(crate) fn new(client: &'a EsClient) -> Self {
        MlClient { client }
    }

    fn model_path(model_id: &str) -> String {
        format!("{}/{}", TRAINED_MODELS_PATH, model_id)
    }

    fn analytics_path(id: &str) -> String {
        format!("{}/{}", DATA_FRAME_ANALYTICS_PATH, id)
    }

    /// Model configuration, optionally with its compressed definition.
    pub fn get_trained_models(&self, model_id: &str, include_definition: bool) -> Result<Value> {
        let mut request = Request::get(Self::model_path(model_id));
        if include_definition {
            request = request
                .with_query("include", "definition")
                .with_query("decompress_definition", "false");
        }
        self.client.perform(request)
    }

    /// Stores a model.
    pub fn put_trained_model(&self, model_id: &str, body: Value) -> Result<Value> {
        self.client
            .perform(Request::put(Self::model_path(model_id), body))
    }

    /// Deletes a stored model.
    pub fn delete_trained_model(&self, model_id: &str) -> Result<Value> {
        self.client.perform(Request::delete(Self::model_path(model_id)))
    }

    /// Runs a stored model on documents without a pipeline.
    pub fn infer_trained_model(&self, model_id: &str, docs: &[Document]) -> Result<Value> {
        self.client.perform(Request::post(
            format!("{}/_infer", Self::model_path(model_id)),
            json!({ "docs": docs }),
        ))
    }

    /// Creates a data frame analytics job.
    pub fn put_data_frame_analytics(&self, id: &str, body: Value) -> Result<Value> {
        self.client.perform(Request::put(Self::analytics_path(id), body))
    }

    /// Starts a data frame analytics job.
    pub fn start_data_frame_analytics(&self, id: &str) -> Result<Value> {
        self.client.perform(Request::post(
            format!("{}/_start", Self::analytics_path(id)),
            json!({}),
        ))
    }

    /// Deletes a data frame analytics job.
    pub fn delete_data_frame_analytics(&self, id: &str, force: bool) -> Result<Value> {
        let mut request = Request::delete(Self::analytics_path(id));
        if force {
            request = request.with_query("force", "true");
        }
        self.client.perform(request)
    }
}
