//! Explanations of exported models.
//!
//! - [`shap`]: path-dependent TreeSHAP over [`EsModel`](crate::export::EsModel)

pub mod shap;

pub use shap::TreeExplainer;
