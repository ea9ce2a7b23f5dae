//! REST client for the remote cluster.
//!
//! Requests go through the [`Transport`] trait so the workflow code can run
//! against a real cluster ([`HttpTransport`]) or an in-memory stand-in.
//! [`EsClient`] adds error mapping, server version discovery and the API
//! namespaces used by this crate:
//!
//! - [`MlClient`]: trained models and data frame analytics
//! - [`IngestClient`]: pipeline simulation
//! - [`IndicesClient`]: index deletion

pub mod http;
pub mod indices;
pub mod ingest;
pub mod ml;

pub use http::HttpTransport;
pub use indices::IndicesClient;
pub use ingest::IngestClient;
pub use ml::MlClient;

use crate::config::ClientConfig;
use crate::core::error::{EsMlError, Result};
use crate::core::types::ServerVersion;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// HTTP method of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// PUT
    Put,
    /// POST
    Post,
    /// DELETE
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        })
    }
}

/// A REST request relative to the cluster base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Path without leading slash, e.g. `_ml/trained_models/my-model`
    pub path: String,
    /// Query string parameters
    pub query: Vec<(String, String)>,
    /// JSON body
    pub body: Option<Value>,
}

impl Request {
    /// Create a request without query or body
    pub fn new<S: Into<String>>(method: Method, path: S) -> Self {
        Request {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// GET request
    pub fn get<S: Into<String>>(path: S) -> Self {
        Self::new(Method::Get, path)
    }

    /// PUT request with a JSON body
    pub fn put<S: Into<String>>(path: S, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    /// POST request with a JSON body
    pub fn post<S: Into<String>>(path: S, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    /// DELETE request
    pub fn delete<S: Into<String>>(path: S) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Add a query parameter
    pub fn with_query<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set the JSON body
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Value of a query parameter
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A REST response with a decoded JSON body (`Null` when empty).
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Decoded body
    pub body: Value,
}

impl Response {
    /// Create a response
    pub fn new(status: u16, body: Value) -> Self {
        Response { status, body }
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests to the cluster.
pub trait Transport: Send + Sync {
    /// Performs one request. Non-2xx statuses are returned, not raised.
    fn perform(&self, request: &Request) -> Result<Response>;
}

/// Builds the error for a non-2xx response.
///
/// Cluster errors look like `{"error": {"type": ..., "reason": ...}, "status": 404}`;
/// some endpoints return `{"error": "..."}` instead.
pub fn api_error(status: u16, body: &Value) -> EsMlError {
    let error = &body["error"];
    let (error_type, reason) = match error {
        Value::Object(_) => (
            error["type"].as_str().unwrap_or("unknown").to_string(),
            error["reason"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        ),
        Value::String(reason) => ("unknown".to_string(), reason.clone()),
        Value::Null => ("unknown".to_string(), body.to_string()),
        other => ("unknown".to_string(), other.to_string()),
    };
    EsMlError::Api {
        status,
        error_type,
        reason,
    }
}

/// Client for the remote cluster.
#[derive(Clone)]
pub struct EsClient {
    transport: Arc<dyn Transport>,
    version: Arc<OnceLock<ServerVersion>>,
    compress_model_definition: bool,
}

impl fmt::Debug for EsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EsClient")
            .field("version", &self.version.get())
            .field("compress_model_definition", &self.compress_model_definition)
            .finish()
    }
}

impl EsClient {
    /// Create a client over any transport
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        EsClient {
            transport,
            version: Arc::new(OnceLock::new()),
            compress_model_definition: true,
        }
    }

    /// Create an HTTP client from connection settings
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        let mut client = Self::new(Arc::new(transport));
        client.compress_model_definition = config.compress_model_definition;
        Ok(client)
    }

    /// Whether uploads are compressed unless the caller says otherwise
    pub fn compress_model_definition(&self) -> bool {
        self.compress_model_definition
    }

    /// Performs a request, returning the raw response whatever its status.
    pub fn perform_raw(&self, request: Request) -> Result<Response> {
        log::debug!("{} /{}", request.method, request.path);
        let response = self.transport.perform(&request)?;
        log::debug!("{} /{} -> {}", request.method, request.path, response.status);
        Ok(response)
    }

    /// Performs a request, turning non-2xx responses into [`EsMlError::Api`].
    pub fn perform(&self, request: Request) -> Result<Value> {
        let response = self.perform_raw(request)?;
        if response.is_success() {
            Ok(response.body)
        } else {
            Err(api_error(response.status, &response.body))
        }
    }

    /// Cluster information (`GET /`).
    pub fn info(&self) -> Result<Value> {
        self.perform(Request::get(""))
    }

    /// Server version, fetched once and cached.
    pub fn server_version(&self) -> Result<ServerVersion> {
        if let Some(version) = self.version.get() {
            return Ok(*version);
        }
        let info = self.info()?;
        let number = info["version"]["number"].as_str().ok_or_else(|| {
            EsMlError::unexpected_response("cluster info has no version.number")
        })?;
        let version: ServerVersion = number.parse()?;
        log::debug!("Connected to cluster version {}", version);
        Ok(*self.version.get_or_init(|| version))
    }

    /// Machine learning APIs
    pub fn ml(&self) -> MlClient<'_> {
        MlClient::new(self)
    }

    /// Ingest APIs
    pub fn ingest(&self) -> IngestClient<'_> {
        IngestClient::new(self)
    }

    /// Index APIs
    pub fn indices(&self) -> IndicesClient<'_> {
        IndicesClient::new(self)
    }
}
