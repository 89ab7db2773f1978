//! # State Module
//!
//! The canonical, versioned model of device telemetry.
//!
//! - [`StatePath`] parses dot/array-index telemetry keys (`cpos[0]`, `super.mode`)
//! - [`StatePatch`] carries a partial update received from the device
//! - [`StateStore`] merges patches copy-on-write and bumps the version once per
//!   accepted patch

mod hardware_state;
mod patch;
mod path;
mod store;

pub use hardware_state::HardwareState;
pub use patch::StatePatch;
pub use path::{PathSegment, StatePath};
pub use store::{AppliedPatch, StateSnapshot, StateStore};
