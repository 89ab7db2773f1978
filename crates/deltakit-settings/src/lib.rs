//! DeltaKit Settings Crate
//!
//! Loads and validates the configuration that drives telemetry polling and
//! logging.

pub mod config;

pub use config::{Config, LoggingSettings, TelemetrySettings, CONFIG_FILE_NAME};
