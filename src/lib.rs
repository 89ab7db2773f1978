//! # DeltaKit
//!
//! Client-side synchronization and control for networked motion hardware:
//! - A versioned, copy-on-write telemetry store fed by device patches
//! - Selector subscriptions that fire only when a derived value changes
//! - Coalesced periodic telemetry requests, one timer per variable
//! - Interlock-gated commands checked against the latest telemetry
//!
//! ## Architecture
//!
//! DeltaKit is organized as a workspace with multiple crates:
//!
//! 1. **deltakit-core** - State store, selector engine, derived state, errors
//! 2. **deltakit-communication** - Transport contract, scheduler, dispatcher, session
//! 3. **deltakit-settings** - Configuration loading and validation
//! 4. **deltakit** - Headless binary that runs a session against the simulated device

pub use deltakit_communication::{
    ChannelTransport, CommandDispatcher, CommandMessage, ControlSession, Interlock,
    IntervalRequestScheduler, NoOpTransport, OutboundMessage, OwnerId, RequestMessage,
    SharedTransport, SimulatedDevice, Transport,
};

pub use deltakit_core::{
    derive_arm_control, derive_position_mm, derive_supervisor_label, ArmControl, CommandError,
    Error, HardwareHub, HardwareState, Position, Result, SchedulerError, SelectorError,
    StateError, StatePatch, StatePath, StateStore, SubscriptionId, SupervisorState,
    TransportError,
};

pub use deltakit_settings::{Config, LoggingSettings, TelemetrySettings};

pub mod demo;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    init_logging_with(&LoggingSettings::default())
}

/// Initialize logging from settings
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_logging_with(settings: &LoggingSettings) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|e| anyhow::anyhow!("Invalid log filter '{}': {}", settings.level, e))?;

    if settings.json {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_level(true)
            .json();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_line_number(true)
            .pretty();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}
