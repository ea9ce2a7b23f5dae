//! Ingest pipeline APIs.

use super::{EsClient, Request};
use crate::core::constants::INGEST_SIMULATE_PATH;
use crate::core::error::Result;
use serde_json::Value;

/// Ingest namespace of [`EsClient`]
#[derive(Debug, Clone, Copy)]
pub struct IngestClient<'a> {
    client: &'a EsClient,
}

impl<'a> IngestClient<'a> {
    pub(crate) fn new(client: &'a EsClient) -> Self {
        IngestClient { client }
    }

    /// Runs documents through an inline pipeline (`POST _ingest/pipeline/_simulate`).
    pub fn simulate(&self, body: Value) -> Result<Value> {
        self.client.perform(Request::post(INGEST_SIMULATE_PATH, body))
    }
}
