//! Engine configuration via `ripple.toml`
//!
//! Logging switches, profiling thresholds and the reaction loop bound. A
//! missing file or missing fields fall back to the defaults, so an empty
//! file is a valid configuration.

use ripple_core::{Error, LoggingOptions, ProfilingOptions, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name looked up next to the application.
pub const CONFIG_FILE_NAME: &str = "ripple.toml";

/// Reaction loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionConfig {
    /// Maximum rounds of reactions triggered by one apply
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

fn default_max_rounds() -> usize {
    ripple_concurrency::DEFAULT_MAX_REACTION_ROUNDS
}

impl Default for ReactionConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
        }
    }
}

/// Engine configuration loaded from `ripple.toml`.
///
/// # Example
///
/// ```toml
/// [logging]
/// enabled = true
/// changes = true
///
/// [profiling]
/// enabled = true
/// main_thread_blocking_warning_threshold_ms = 20
///
/// [reactions]
/// max_rounds = 50
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Which activities are logged
    #[serde(default)]
    pub logging: LoggingOptions,
    /// Performance warning thresholds
    #[serde(default)]
    pub profiling: ProfilingOptions,
    /// Reaction loop settings
    #[serde(default)]
    pub reactions: ReactionConfig,
}

impl EngineConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Ripple engine configuration

[logging]
# Master switch for debug logs (default: false)
enabled = false
transactions = true
operations = true
reactions = true
# Individual field writes, very verbose
changes = false
gc = false

[profiling]
# Performance warnings (default: false)
enabled = false
repetitive_usage_warning_threshold = 10
main_thread_blocking_warning_threshold_ms = 14
async_action_duration_warning_threshold_ms = 300
garbage_collection_summary_interval = 100

[reactions]
# Reactions triggering reactions are cut after this many rounds
max_rounds = 100
"#
    }

    /// Parse config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the text is not valid TOML for this struct.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
