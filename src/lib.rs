//! # esml
//!
//! Moves fitted tree-ensemble models into the Elasticsearch machine learning
//! model store and proves that the remote copy predicts what the local model
//! predicts.
//!
//! ## Features
//!
//! - **Model conversion**: scikit-learn decision trees and random forests,
//!   XGBoost JSON models and LightGBM text models become model definitions.
//! - **Upload**: definitions are sent compressed (`compressed_definition`)
//!   or inline over the REST API.
//! - **Equivalence checks**: remote predictions from an ingest pipeline
//!   simulation are compared with local predictions to a number of decimals.
//! - **Export**: forests stored remotely, including those trained by data
//!   frame analytics, are rebuilt as local pipelines with a TreeSHAP
//!   explainer.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use esml::{ClientConfig, EsClient, ImportOptions, MLModel, ModelTransformer, XgbModel};
//! use esml::harness::check_prediction_equality;
//! use ndarray::Array2;
//!
//! # fn main() -> esml::Result<()> {
//! esml::init()?;
//! let client = EsClient::from_config(&ClientConfig::new("http://localhost:9200"))?;
//!
//! let model = XgbModel::from_file("model.json")?;
//! let feature_names = model.feature_names();
//! let es_model = MLModel::import_model(
//!     client,
//!     "my-xgb-model",
//!     &model,
//!     &feature_names,
//!     ImportOptions::default(),
//! )?;
//!
//! let rows = Array2::from_shape_vec((2, 2), vec![0.5, 1.0, -1.0, 3.0]).unwrap();
//! check_prediction_equality(&es_model, &model, rows.view(), 2)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: types, constants and the error type
//! - [`config`]: connection settings
//! - [`tree`], [`ensemble`], [`preprocessing`], [`definition`]: the model
//!   definition format and its local evaluation
//! - [`io`]: model file parsers and the definition codec
//! - [`transformers`]: conversion of each model family
//! - [`client`]: REST client and transports
//! - [`ml_model`]: remote model handle
//! - [`export`], [`prediction`]: local pipelines and TreeSHAP
//! - [`harness`]: prediction equality checks

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    non_snake_case,
    non_upper_case_globals
)]

// Core infrastructure module - always available
pub mod core;

// Configuration management module
pub mod config;

// Model definition format
pub mod definition;
pub mod ensemble;
pub mod preprocessing;
pub mod tree;

// Model files and definition encoding
pub mod io;

// Model family conversions
pub mod transformers;

// Remote store
pub mod client;
pub mod ml_model;

// Reverse path
pub mod export;
pub mod prediction;

pub mod harness;

// Re-export core functionality for convenience
pub use self::core::{
    constants::*,
    error::{EsMlError, Result},
    types::*,
};

pub use self::config::{ClientConfig, ClientConfigBuilder};

pub use definition::{InferenceConfig, InferenceResult, TrainedModel, TrainedModelDefinition};
pub use ensemble::{AggregateOutput, Ensemble};
pub use preprocessing::Preprocessor;
pub use tree::{DecisionType, Tree, TreeNode};

pub use io::{decode_definition, encode_definition, LgbModel, SklearnModel, XgbModel};
pub use transformers::{LocalModel, ModelKind, ModelTransformer, SupportedModel};

pub use client::{EsClient, HttpTransport, Request, Response, Transport};
pub use ml_model::{ImportOptions, MLModel};

pub use export::{EsModel, Pipeline, PredictedValue};
pub use prediction::TreeExplainer;

// Version information
pub use self::core::constants::ESML_VERSION as VERSION;

/// Initialize logging for the library.
///
/// # Examples
///
/// ```rust
/// fn main() -> esml::Result<()> {
///     esml::init()?;
///     assert!(esml::is_initialized());
///     Ok(())
/// }
/// ```
pub fn init() -> Result<()> {
    core::initialize_core()
}

/// Check if the library has been initialized.
pub fn is_initialized() -> bool {
    core::is_core_initialized()
}
