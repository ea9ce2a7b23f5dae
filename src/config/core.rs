//! Client configuration structures.
//!
//! This module provides the connection settings used to reach the remote
//! cluster, a builder for setting them up programmatically, and loaders for
//! configuration files and environment variables.

use crate::core::constants::*;
use crate::core::error::{EsMlError, Result};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Connection settings for the remote cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the cluster, e.g. `https://localhost:9200`
    pub url: String,
    /// Basic authentication user name
    pub username: Option<String>,
    /// Basic authentication password
    pub password: Option<String>,
    /// Encoded API key sent as `Authorization: ApiKey ...`
    pub api_key: Option<String>,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Verify TLS certificates
    pub verify_certs: bool,
    /// Upload definitions gzip+base64 encoded by default
    pub compress_model_definition: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            url: DEFAULT_URL.to_string(),
            username: None,
            password: None,
            api_key: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            verify_certs: true,
            compress_model_definition: true,
        }
    }
}

impl ClientConfig {
    /// Create a configuration pointing at `url` with all other settings defaulted
    pub fn new<S: Into<String>>(url: S) -> Self {
        ClientConfig {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Parsed base URL
    pub fn parsed_url(&self) -> Result<Url> {
        Url::parse(&self.url).map_err(|e| {
            EsMlError::invalid_parameter("url", self.url.clone(), format!("not a valid URL: {}", e))
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let url = self.parsed_url()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(EsMlError::invalid_parameter(
                "url",
                self.url.clone(),
                "scheme must be http or https",
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(EsMlError::invalid_parameter(
                "request_timeout_secs",
                "0",
                "must be positive",
            ));
        }

        match (&self.username, &self.password) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(EsMlError::config(
                    "basic authentication requires both username and password",
                ));
            }
            _ => {}
        }

        if self.username.is_some() && self.api_key.is_some() {
            return Err(EsMlError::config(
                "basic authentication and api_key are mutually exclusive",
            ));
        }

        if !self.verify_certs {
            log::warn!("TLS certificate verification is disabled for {}", self.url);
        }

        Ok(())
    }

    /// Load configuration from a `.toml` or `.json` file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EsMlError::config(format!("Failed to read config file: {}", e)))?;

        let config: ClientConfig = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content)
                .map_err(|e| EsMlError::config(format!("Failed to parse JSON config: {}", e)))?
        } else if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&content)
                .map_err(|e| EsMlError::config(format!("Failed to parse TOML config: {}", e)))?
        } else {
            return Err(EsMlError::config(
                "Unsupported config file format. Use .json or .toml",
            ));
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a `.toml` or `.json` file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::to_string_pretty(self)
                .map_err(|e| EsMlError::config(format!("Failed to serialize to JSON: {}", e)))?
        } else if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::to_string_pretty(self)
                .map_err(|e| EsMlError::config(format!("Failed to serialize to TOML: {}", e)))?
        } else {
            return Err(EsMlError::config(
                "Unsupported config file format. Use .json or .toml",
            ));
        };

        std::fs::write(path, content)
            .map_err(|e| EsMlError::config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Load configuration from environment variables
    pub fn load_from_environment() -> Result<Self> {
        let mut config = ClientConfig::default();
        config.apply_environment_overrides()?;
        Ok(config)
    }

    /// Override fields with any `ES_*` environment variables that are set
    pub fn apply_environment_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("ES_URL") {
            self.url = val;
        }

        if let Ok(val) = std::env::var("ES_USERNAME") {
            self.username = Some(val);
        }

        if let Ok(val) = std::env::var("ES_PASSWORD") {
            self.password = Some(val);
        }

        if let Ok(val) = std::env::var("ES_API_KEY") {
            self.api_key = Some(val);
        }

        if let Ok(val) = std::env::var("ES_REQUEST_TIMEOUT") {
            self.request_timeout_secs = val
                .parse()
                .map_err(|_| EsMlError::config("Invalid ES_REQUEST_TIMEOUT"))?;
        }

        if let Ok(val) = std::env::var("ES_VERIFY_CERTS") {
            self.verify_certs = parse_bool(&val)
                .ok_or_else(|| EsMlError::config("Invalid ES_VERIFY_CERTS"))?;
        }

        self.validate()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        ClientConfigBuilder {
            config: ClientConfig::default(),
        }
    }

    /// Set the cluster URL
    pub fn url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.url = url.into();
        self
    }

    /// Use basic authentication
    pub fn basic_auth<U: Into<String>, P: Into<String>>(mut self, username: U, password: P) -> Self {
        self.config.username = Some(username.into());
        self.config.password = Some(password.into());
        self
    }

    /// Use API key authentication
    pub fn api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.config.api_key = Some(api_key.into());
        self
    }

    /// Set the request timeout in seconds
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    /// Enable or disable TLS certificate verification
    pub fn verify_certs(mut self, verify: bool) -> Self {
        self.config.verify_certs = verify;
        self
    }

    /// Set the default for compressed definition uploads
    pub fn compress_model_definition(mut self, compress: bool) -> Self {
        self.config.compress_model_definition = compress;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
