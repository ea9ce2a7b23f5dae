//! REST paths, protocol constants and defaults.

use crate::core::types::ServerVersion;

/// Crate version string
pub const ESML_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Trained model store path prefix.
pub const TRAINED_MODELS_PATH: &str = "_ml/trained_models";

/// Data frame analytics path prefix.
pub const DATA_FRAME_ANALYTICS_PATH: &str = "_ml/data_frame/analytics";

/// Ingest pipeline simulation path.
pub const INGEST_SIMULATE_PATH: &str = "_ingest/pipeline/_simulate";

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default cluster URL used when nothing else is configured.
pub const DEFAULT_URL: &str = "http://localhost:9200";

/// Default number of decimals local and remote predictions must agree on.
pub const DEFAULT_DECIMAL: i32 = 2;

/// Oldest server that runs multi-class classification models.
pub const MIN_MULTICLASS_VERSION: ServerVersion = ServerVersion::new(7, 7, 0);

/// Field the inference processor writes results under.
pub const INFERENCE_TARGET_FIELD: &str = "ml.inference";

/// Result field holding the predicted value.
pub const PREDICTED_VALUE_FIELD: &str = "predicted_value";

/// Result field holding the winning class probability.
pub const PREDICTION_PROBABILITY_FIELD: &str = "prediction_probability";

/// Result field holding the weighted winning class score.
pub const PREDICTION_SCORE_FIELD: &str = "prediction_score";

/// Result field holding the ranked classes.
pub const TOP_CLASSES_FIELD: &str = "top_classes";

/// Lower clamp applied before taking logits of probabilities.
pub const PROBABILITY_EPSILON: f64 = 1e-7;
