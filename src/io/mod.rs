//! Readers for serialized tree models and the model definition codec.
//!
//! Each submodule mirrors one on-disk format: scikit-learn estimators
//! exported as JSON, XGBoost `save_model("*.json")` documents and LightGBM
//! text models. [`codec`] handles the compressed transport encoding of
//! model definitions.

pub mod codec;
pub mod lightgbm;
pub mod sklearn;
pub mod xgboost;

pub use codec::{decode_definition, decode_definition_value, encode_definition, CompressionStats};
pub use lightgbm::{LgbModel, LgbTree, MissingType, SplitKind};
pub use sklearn::SklearnModel;
pub use xgboost::XgbModel;
