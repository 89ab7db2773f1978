//! # Selector Module
//!
//! Subscriptions to slices of the telemetry state.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use deltakit_core::{HardwareHub, StatePatch};
//!
//! let hub = HardwareHub::new();
//! let id = hub.subscribe_path("super.supervisor", |value| {
//!     println!("supervisor is now {:?}", value);
//! })?;
//!
//! hub.apply_patch(&StatePatch::new().with("super.supervisor", "ARMED"))?;
//! hub.unsubscribe(id);
//! ```

mod engine;

pub use engine::{NotifyReport, SelectorEngine, SubscriptionId};

use crate::error::SelectorError;
use crate::state::{HardwareState, StatePath};
use serde_json::Value;

/// Build a selector that projects the value at `path`
///
/// An absent value projects to `None` rather than failing, so observers see
/// a variable appear and disappear.
pub fn select_path(
    path: StatePath,
) -> impl Fn(&HardwareState) -> Result<Option<Value>, SelectorError> + Send + Sync + 'static {
    move |state: &HardwareState| Ok(state.get(&path).cloned())
}

/// Build a selector that requires a number at `path`
pub fn select_f64(
    path: StatePath,
) -> impl Fn(&HardwareState) -> Result<f64, SelectorError> + Send + Sync + 'static {
    move |state: &HardwareState| match state.get(&path) {
        Some(value) => value.as_f64().ok_or_else(|| SelectorError::TypeMismatch {
            path: path.to_string(),
            expected: "a number".to_string(),
        }),
        None => Err(SelectorError::Missing {
            path: path.to_string(),
        }),
    }
}
