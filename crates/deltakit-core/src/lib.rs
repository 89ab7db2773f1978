//! # DeltaKit Core
//!
//! Core types and state synchronization for DeltaKit.
//! Provides the canonical, versioned model of device telemetry, the selector
//! subscription engine that observers use to react to slices of it, and the
//! pure derivations (supervisor label, control mode, position) built on top.

pub mod data;
pub mod error;
pub mod hub;
pub mod selector;
pub mod state;
pub mod types;

pub use data::{
    control_mode_selected, derive_arm_control, derive_control_mode, derive_position_mm,
    derive_supervisor_label, is_moving, ArmControl, Position, SupervisorState,
};

pub use error::{
    CommandError, Error, Result, SchedulerError, SelectorError, StateError, TransportError,
};

pub use hub::HardwareHub;

pub use selector::{select_f64, select_path, NotifyReport, SelectorEngine, SubscriptionId};

pub use state::{
    AppliedPatch, HardwareState, PathSegment, StatePatch, StatePath, StateSnapshot, StateStore,
};

// Re-export type aliases for convenience
pub use types::{thread_safe, ThreadSafe};
