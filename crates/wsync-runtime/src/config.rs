#![forbid(unsafe_code)]

//! Registry configuration.
//!
//! Defaults match the stock widget protocol; hosts override them from JSON
//! or, with the `config-toml` feature, from TOML.
//!
//! ```
//! use wsync_runtime::config::RegistryConfig;
//!
//! let config = RegistryConfig::from_json_str(r#"{"send_open_buffers": false}"#).unwrap();
//! assert!(!config.send_open_buffers);
//! assert_eq!(config.target_name, "jupyter.widget");
//! ```

use core::fmt;

use serde::Deserialize;

/// Comm target every model channel is opened against.
pub const DEFAULT_TARGET_NAME: &str = "jupyter.widget";
/// Protocol version advertised in open metadata.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2.0.0";

/// Settings shared by every model of one registry.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Comm target name used when opening channels.
    pub target_name: String,
    /// Protocol version sent as open metadata and checked on remote opens.
    pub protocol_version: String,
    /// Front-end major version expected at first display.
    pub expected_frontend_major: u64,
    /// Whether the open message may carry binary buffers.
    pub send_open_buffers: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            target_name: DEFAULT_TARGET_NAME.to_owned(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_owned(),
            expected_frontend_major: 2,
            send_open_buffers: true,
        }
    }
}

impl RegistryConfig {
    /// Parse from a JSON document. Missing fields take their defaults.
    pub fn from_json_str(source: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse from a TOML document. Missing fields take their defaults.
    #[cfg(feature = "config-toml")]
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Major component of the configured protocol version.
    #[must_use]
    pub fn protocol_major(&self) -> Option<u64> {
        version_major(&self.protocol_version)
    }
}

/// Leading numeric component of a dotted version string.
#[must_use]
pub fn version_major(version: &str) -> Option<u64> {
    version
        .trim()
        .trim_start_matches(['^', '~', 'v'])
        .split('.')
        .next()
        .and_then(|major| major.parse().ok())
}

/// Configuration loading failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "invalid registry config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
