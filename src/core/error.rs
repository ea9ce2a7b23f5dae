//! Error handling and error types for esml.
//!
//! This module provides the crate-wide error type used by the model
//! transformers, the REST client, the import/predict workflow and the
//! export path. Every fallible operation in the crate returns [`Result`].

use std::io;
use thiserror::Error;

/// Main error type for the esml library.
///
/// Variants cover local problems (bad configuration, malformed model files,
/// unsupported model features) as well as failures reported by the remote
/// cluster.
#[derive(Error, Debug)]
pub enum EsMlError {
    /// Configuration and validation errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A local model file could not be parsed
    #[error("Model parse error: {message}")]
    ModelParse { message: String },

    /// The model uses a feature that cannot be expressed as a model definition
    #[error("Unsupported model: {message}")]
    UnsupportedModel { message: String },

    /// A model definition failed structural validation
    #[error("Invalid model definition: {message}")]
    InvalidDefinition { message: String },

    /// Local prediction errors
    #[error("Prediction error: {message}")]
    Prediction { message: String },

    /// Model definition encoding/decoding errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// A model with the same id is already stored remotely
    #[error("Trained machine learning model {model_id} already exists")]
    ModelAlreadyExists { model_id: String },

    /// The requested model is not stored remotely
    #[error("Trained machine learning model {model_id} not found")]
    ModelNotFound { model_id: String },

    /// A document in an inference response carried an error object
    #[error("Failed to run prediction for model ID '{model_id}'")]
    InferenceFailed {
        model_id: String,
        error: serde_json::Value,
    },

    /// Non-success response from the REST API
    #[error("API error (status {status}): [{error_type}] {reason}")]
    Api {
        status: u16,
        error_type: String,
        reason: String,
    },

    /// A response did not have the expected shape
    #[error("Unexpected response: {message}")]
    UnexpectedResponse { message: String },

    /// The remote cluster is too old for the requested operation
    #[error("Unsupported server version {actual}: {feature} requires {required} or later")]
    UnsupportedServerVersion {
        feature: String,
        required: String,
        actual: String,
    },

    /// A stored model cannot be turned into a local model
    #[error("Error initializing exported model: {message}")]
    Export { message: String },

    /// Local and remote predictions disagree
    #[error("Prediction mismatch: {message}")]
    PredictionMismatch { message: String },

    /// Dimension mismatch errors
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    /// Invalid input parameters
    #[error("Invalid parameter: {parameter} = {value}, {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },

    /// File I/O errors
    #[error("I/O error: {source}")]
    IO {
        #[from]
        source: io::Error,
    },

    /// JSON serialization errors
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// HTTP transport errors
    #[error("HTTP error: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    /// URL construction errors
    #[error("URL error: {source}")]
    Url {
        #[from]
        source: url::ParseError,
    },

    /// Base64 decoding errors
    #[error("Base64 error: {source}")]
    Base64 {
        #[from]
        source: base64::DecodeError,
    },
}

/// Type alias for Results using EsMlError
pub type Result<T> = std::result::Result<T, EsMlError>;

impl EsMlError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        EsMlError::Config {
            message: message.into(),
        }
    }

    /// Create a model parse error
    pub fn model_parse<S: Into<String>>(message: S) -> Self {
        EsMlError::ModelParse {
            message: message.into(),
        }
    }

    /// Create an unsupported model error
    pub fn unsupported_model<S: Into<String>>(message: S) -> Self {
        EsMlError::UnsupportedModel {
            message: message.into(),
        }
    }

    /// Create an invalid definition error
    pub fn invalid_definition<S: Into<String>>(message: S) -> Self {
        EsMlError::InvalidDefinition {
            message: message.into(),
        }
    }

    /// Create a prediction error
    pub fn prediction<S: Into<String>>(message: S) -> Self {
        EsMlError::Prediction {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        EsMlError::Serialization {
            message: message.into(),
        }
    }

    /// Create an unexpected response error
    pub fn unexpected_response<S: Into<String>>(message: S) -> Self {
        EsMlError::UnexpectedResponse {
            message: message.into(),
        }
    }

    /// Create an export error
    pub fn export<S: Into<String>>(message: S) -> Self {
        EsMlError::Export {
            message: message.into(),
        }
    }

    /// Create a prediction mismatch error
    pub fn prediction_mismatch<S: Into<String>>(message: S) -> Self {
        EsMlError::PredictionMismatch {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter<P, V, R>(parameter: P, value: V, reason: R) -> Self
    where
        P: Into<String>,
        V: Into<String>,
        R: Into<String>,
    {
        EsMlError::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a dimension mismatch error
    pub fn dimension_mismatch<E, A>(expected: E, actual: A) -> Self
    where
        E: Into<String>,
        A: Into<String>,
    {
        EsMlError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// HTTP status code of a remote failure, if this error came from the API
    pub fn status(&self) -> Option<u16> {
        match self {
            EsMlError::Api { status, .. } => Some(*status),
            EsMlError::ModelNotFound { .. } => Some(404),
            EsMlError::Http { source } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether this error is a remote "not found"
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            EsMlError::Config { .. } => false,
            EsMlError::ModelParse { .. } => false,
            EsMlError::UnsupportedModel { .. } => false,
            EsMlError::InvalidDefinition { .. } => false,
            EsMlError::Prediction { .. } => true,
            EsMlError::Serialization { .. } => false,
            EsMlError::ModelAlreadyExists { .. } => true,
            EsMlError::ModelNotFound { .. } => true,
            EsMlError::InferenceFailed { .. } => false,
            EsMlError::Api { status, .. } => *status == 429 || *status >= 500,
            EsMlError::UnexpectedResponse { .. } => false,
            EsMlError::UnsupportedServerVersion { .. } => false,
            EsMlError::Export { .. } => false,
            EsMlError::PredictionMismatch { .. } => false,
            EsMlError::DimensionMismatch { .. } => false,
            EsMlError::InvalidParameter { .. } => false,
            EsMlError::IO { .. } => false,
            EsMlError::Json { .. } => false,
            EsMlError::Http { source } => source.is_timeout() || source.is_connect(),
            EsMlError::Url { .. } => false,
            EsMlError::Base64 { .. } => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            EsMlError::Config { .. } => "config",
            EsMlError::ModelParse { .. } => "model_parse",
            EsMlError::UnsupportedModel { .. } => "unsupported_model",
            EsMlError::InvalidDefinition { .. } => "invalid_definition",
            EsMlError::Prediction { .. } => "prediction",
            EsMlError::Serialization { .. } => "serialization",
            EsMlError::ModelAlreadyExists { .. } => "model_already_exists",
            EsMlError::ModelNotFound { .. } => "model_not_found",
            EsMlError::InferenceFailed { .. } => "inference_failed",
            EsMlError::Api { .. } => "api",
            EsMlError::UnexpectedResponse { .. } => "unexpected_response",
            EsMlError::UnsupportedServerVersion { .. } => "unsupported_server_version",
            EsMlError::Export { .. } => "export",
            EsMlError::PredictionMismatch { .. } => "prediction_mismatch",
            EsMlError::DimensionMismatch { .. } => "dimension_mismatch",
            EsMlError::InvalidParameter { .. } => "invalid_parameter",
            EsMlError::IO { .. } => "io",
            EsMlError::Json { .. } => "json",
            EsMlError::Http { .. } => "http",
            EsMlError::Url { .. } => "url",
            EsMlError::Base64 { .. } => "base64",
        }
    }
}

/// Convenience macro for building unsupported-model errors
#[macro_export]
macro_rules! unsupported_model {
    ($msg:expr) => {
        $crate::core::error::EsMlError::unsupported_model($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::EsMlError::unsupported_model(format!($fmt, $($arg)*))
    };
}

/// Convenience macro for building invalid-definition errors
#[macro_export]
macro_rules! invalid_definition {
    ($msg:expr) => {
        $crate::core::error::EsMlError::invalid_definition($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::EsMlError::invalid_definition(format!($fmt, $($arg)*))
    };
}
