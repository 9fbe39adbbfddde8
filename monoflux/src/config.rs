//! Runtime configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Top-level configuration for a [`crate::Flux`] instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FluxConfig {
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Pretty-print snapshot blobs
    #[serde(default)]
    pub pretty: bool,

    /// Fail instead of skipping when a blob names an unknown store
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Log every payload body at trace level
    #[serde(default)]
    pub trace_payloads: bool,
}

impl FluxConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Get a nested config value using dotted path (e.g., "snapshot.pretty")
    pub fn get(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["snapshot", "pretty"] => Some(self.snapshot.pretty.to_string()),
            ["snapshot", "strict"] => Some(self.snapshot.strict.to_string()),
            ["dispatcher", "trace_payloads"] => Some(self.dispatcher.trace_payloads.to_string()),
            _ => None,
        }
    }
}
