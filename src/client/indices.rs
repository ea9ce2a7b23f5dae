//! Index APIs.

use super::{EsClient, Request};
use crate::core::error::Result;
use serde_json::Value;

/// Index namespace of [`EsClient`]
#[derive(Debug, Clone, Copy)]
pub struct IndicesClient<'a> {
    client: &'a EsClient,
}

impl<'a> IndicesClient<'a> {
    pub(crate) fn new(client: &'a EsClient) -> Self {
        IndicesClient { client }
    }

    /// Deletes an index. A missing index is not an error.
    pub fn delete(&self, index: &str) -> Result<Value> {
        self.client
            .perform(Request::delete(index).with_query("ignore_unavailable", "true"))
    }
}
