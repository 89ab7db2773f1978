//! Configuration management for DeltaKit
//!
//! Provides configuration file loading and validation. Supports JSON and
//! TOML file formats stored in the platform config directory.
//!
//! Configuration is organized into logical sections:
//! - Telemetry polling (default cadence, floor, always-polled variables)
//! - Logging (filter directive, output format)
//!
//! Every field has a default, so a partial file only overrides what it names.

use deltakit_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Telemetry polling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Interval used when a caller does not name one
    pub default_poll_interval_ms: u64,
    /// Shortest interval a poll timer may run at
    pub min_poll_interval_ms: u64,
    /// Variables the session polls for its whole lifetime
    pub poll_variables: Vec<String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            default_poll_interval_ms: 50,
            min_poll_interval_ms: 10,
            poll_variables: vec!["cpos".to_string()],
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing` filter directive, e.g. `info` or `deltakit_core=debug`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Telemetry polling
    pub telemetry: TelemetrySettings,
    /// Logging
    pub logging: LoggingSettings,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform location of the user config file, if one can be determined
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("deltakit").join(CONFIG_FILE_NAME))
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::other(format!("Failed to read config file: {}", e)))?;

        let config: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .map_err(|e| Error::other(format!("Invalid JSON config: {}", e)))?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)
                .map_err(|e| Error::other(format!("Invalid TOML config: {}", e)))?
        } else {
            return Err(Error::other(
                "Config file must be .json or .toml".to_string(),
            ));
        };

        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default path if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let telemetry = &self.telemetry;
        if telemetry.min_poll_interval_ms == 0 {
            return Err(Error::other(
                "Minimum poll interval must be > 0".to_string(),
            ));
        }

        if telemetry.default_poll_interval_ms < telemetry.min_poll_interval_ms {
            return Err(Error::other(format!(
                "Default poll interval ({}ms) is below the minimum ({}ms)",
                telemetry.default_poll_interval_ms, telemetry.min_poll_interval_ms
            )));
        }

        // Polled variables are top-level names, not paths
        if let Some(bad) = telemetry
            .poll_variables
            .iter()
            .find(|v| v.is_empty() || v.contains(['.', '[', ']']))
        {
            return Err(Error::other(format!(
                "Invalid poll variable '{}': expected a top-level name",
                bad
            )));
        }

        if self.logging.level.trim().is_empty() {
            return Err(Error::other("Logging level must not be empty".to_string()));
        }

        Ok(())
    }

    /// Poll floor as a duration
    pub fn min_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.telemetry.min_poll_interval_ms)
    }
}
