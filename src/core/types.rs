//! Core data types shared across esml.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::error::{EsMlError, Result};

/// A document sent to or produced by an inference call: field name to value.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Feature index type for identifying features in a model.
pub type FeatureIndex = usize;

/// Tree node identifier type.
pub type NodeIndex = usize;

/// Kind of prediction a model produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    /// Continuous target
    Regression,
    /// Discrete class labels
    Classification,
}

impl ModelType {
    /// The matching model-definition target type
    pub fn target_type(self) -> TargetType {
        match self {
            ModelType::Regression => TargetType::Regression,
            ModelType::Classification => TargetType::Classification,
        }
    }

    /// Key used by `inference_config` objects
    pub fn as_str(self) -> &'static str {
        match self {
            ModelType::Regression => "regression",
            ModelType::Classification => "classification",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `target_type` field of trees and ensembles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// Raw numeric output
    #[default]
    Regression,
    /// Class probabilities
    Classification,
}

impl From<TargetType> for ModelType {
    fn from(target: TargetType) -> Self {
        match target {
            TargetType::Regression => ModelType::Regression,
            TargetType::Classification => ModelType::Classification,
        }
    }
}

/// What to do when importing a model whose id already exists remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IfExists {
    /// Return [`EsMlError::ModelAlreadyExists`]
    #[default]
    Fail,
    /// Delete the stored model and upload the new one
    Replace,
}

impl FromStr for IfExists {
    type Err = EsMlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fail" => Ok(IfExists::Fail),
            "replace" => Ok(IfExists::Replace),
            other => Err(EsMlError::invalid_parameter(
                "es_if_exists",
                other,
                "must be 'fail' or 'replace'",
            )),
        }
    }
}

/// Version reported by the remote cluster (`GET /`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
    /// Patch version
    pub patch: u32,
}

impl ServerVersion {
    /// Create a version triple
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        ServerVersion {
            major,
            minor,
            patch,
        }
    }

    /// Whether this version is at least `major.minor`
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

impl FromStr for ServerVersion {
    type Err = EsMlError;

    /// Parses `8.11.1`, `8.12.0-SNAPSHOT` and similar strings.
    fn from_str(s: &str) -> Result<Self> {
        let core = s.split(['-', '+']).next().unwrap_or_default();
        let mut parts = core.split('.').map(|p| p.parse::<u32>());
        let mut next = |name: &str| -> Result<u32> {
            match parts.next() {
                Some(Ok(v)) => Ok(v),
                Some(Err(_)) => Err(EsMlError::unexpected_response(format!(
                    "invalid {} component in version '{}'",
                    name, s
                ))),
                None => Ok(0),
            }
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        if core.is_empty() {
            return Err(EsMlError::unexpected_response(format!(
                "empty server version '{}'",
                s
            )));
        }
        Ok(ServerVersion::new(major, minor, patch))
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
