//! Configuration management for esml.
//!
//! Connection settings can come from code ([`ClientConfigBuilder`]), a
//! configuration file, or `ES_*` environment variables.

pub mod core;

pub use self::core::{ClientConfig, ClientConfigBuilder};

/// Default configuration file looked up by the command line tool
pub const DEFAULT_CONFIG_FILE: &str = "esml.toml";
