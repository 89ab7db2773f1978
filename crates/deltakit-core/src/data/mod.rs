//! Derived machine state
//!
//! Pure functions that turn raw telemetry into the labels and decisions the
//! rest of the application acts on:
//! - Supervisor label and state (IDLE / ARMED / MOVING)
//! - Selected control mode
//! - Arm/disarm intent for the arm control
//! - Cartesian position in millimetres
//!
//! None of these are stored; they are recomputed from the snapshot on demand
//! and never panic, whatever the telemetry looks like.

use crate::state::HardwareState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Telemetry paths the derivations read
///
/// Firmware reports supervisor data grouped under `super`/`moStat`; the flat
/// names are accepted as a fallback for devices that report them top-level.
pub mod keys {
    /// Supervisor state, grouped layout
    pub const SUPERVISOR: &str = "super.supervisor";
    /// Supervisor state, flat layout
    pub const SUPERVISOR_FLAT: &str = "supervisor";
    /// Selected control mode, grouped layout
    pub const CONTROL_MODE: &str = "super.mode";
    /// Selected control mode, flat layout
    pub const CONTROL_MODE_FLAT: &str = "control_mode";
    /// Path interpolator activity flag, grouped layout
    pub const PATHING_STATE: &str = "moStat.pathing_state";
    /// Path interpolator activity flag, flat layout
    pub const PATHING_STATE_FLAT: &str = "pathing_state";
    /// Current end-effector position in micrometres
    pub const POSITION: &str = "cpos";
}

/// Control mode reported when no mode is selected
pub const MODE_NONE: &str = "NONE";
/// Raw supervisor value for an armed machine
pub const SUPERVISOR_ARMED: &str = "ARMED";
/// Raw supervisor value for an idle machine
pub const SUPERVISOR_IDLE: &str = "IDLE";
/// Label shown while armed and following a path
pub const LABEL_MOVING: &str = "MOVING";
/// Label shown when the supervisor has not reported
pub const LABEL_UNKNOWN: &str = "UNKNOWN";

/// Device position units per millimetre
const MICRONS_PER_MM: f64 = 1000.0;

fn first_present<'a>(state: &'a HardwareState, paths: &[&str]) -> Option<&'a Value> {
    paths
        .iter()
        .filter_map(|path| state.lookup(path))
        .find(|value| !value.is_null())
}

/// Raw supervisor value as text; empty strings, `0` and `false` count as absent
fn supervisor_raw(state: &HardwareState) -> Option<String> {
    match first_present(state, &[keys::SUPERVISOR, keys::SUPERVISOR_FLAT])? {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(false) => None,
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        other => Some(other.to_string()),
    }
}

/// Whether the path interpolator reports motion (flag equal to 1)
///
/// Firmware may report the flag as a number, a boolean or numeric text.
pub fn is_moving(state: &HardwareState) -> bool {
    match first_present(state, &[keys::PATHING_STATE, keys::PATHING_STATE_FLAT]) {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(n)) => n.as_f64() == Some(1.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok() == Some(1.0),
        _ => false,
    }
}

/// Display label for the supervisor
///
/// ARMED with the motion flag set reads as `MOVING`; ARMED otherwise reads
/// as `ARMED`; any other reported value is shown as-is, and a missing value
/// reads as `UNKNOWN`.
pub fn derive_supervisor_label(state: &HardwareState) -> String {
    match supervisor_raw(state) {
        Some(raw) if raw == SUPERVISOR_ARMED => {
            if is_moving(state) {
                LABEL_MOVING.to_string()
            } else {
                SUPERVISOR_ARMED.to_string()
            }
        }
        Some(raw) => raw,
        None => LABEL_UNKNOWN.to_string(),
    }
}

/// Supervisor state as confirmed by device telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupervisorState {
    /// Not reported, or a value this client does not model
    Unknown,
    /// Disarmed and ready
    Idle,
    /// Armed and holding position
    Armed,
    /// Armed and following a path
    ArmedMoving,
}

impl SupervisorState {
    /// Derive the state from telemetry
    pub fn from_state(state: &HardwareState) -> Self {
        match supervisor_raw(state).as_deref() {
            Some(SUPERVISOR_ARMED) if is_moving(state) => SupervisorState::ArmedMoving,
            Some(SUPERVISOR_ARMED) => SupervisorState::Armed,
            Some(SUPERVISOR_IDLE) => SupervisorState::Idle,
            _ => SupervisorState::Unknown,
        }
    }

    /// Whether motors are energised
    pub fn is_armed(&self) -> bool {
        matches!(self, SupervisorState::Armed | SupervisorState::ArmedMoving)
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Unknown => write!(f, "UNKNOWN"),
            SupervisorState::Idle => write!(f, "IDLE"),
            SupervisorState::Armed => write!(f, "ARMED"),
            SupervisorState::ArmedMoving => write!(f, "ARMED-MOVING"),
        }
    }
}

/// Currently selected control mode, if reported
pub fn derive_control_mode(state: &HardwareState) -> Option<String> {
    match first_present(state, &[keys::CONTROL_MODE, keys::CONTROL_MODE_FLAT])? {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Whether a control mode other than `NONE` is selected
///
/// A mode that has not been reported counts as not selected.
pub fn control_mode_selected(state: &HardwareState) -> bool {
    derive_control_mode(state).is_some_and(|mode| mode != MODE_NONE)
}

/// What the arm control should offer for the current state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArmControl {
    /// Disarmed with no mode selected; arming is unavailable
    SelectModeFirst,
    /// Disarmed with a mode selected; arming is available
    Arm {
        /// The mode the machine will arm into
        mode: String,
    },
    /// Armed; disarming is available
    Disarm,
}

impl ArmControl {
    /// Command the control would send, if it is enabled
    pub fn command(&self) -> Option<&'static str> {
        match self {
            ArmControl::SelectModeFirst => None,
            ArmControl::Arm { .. } => Some("arm"),
            ArmControl::Disarm => Some("disarm"),
        }
    }

    /// Caption for the control
    pub fn label(&self) -> String {
        match self {
            ArmControl::SelectModeFirst => "Select a mode before arming".to_string(),
            ArmControl::Arm { mode } => format!("Arm ({})", mode),
            ArmControl::Disarm => "Disarm".to_string(),
        }
    }
}

/// Decide what the arm control offers
pub fn derive_arm_control(state: &HardwareState) -> ArmControl {
    if supervisor_raw(state).as_deref() == Some(SUPERVISOR_ARMED) {
        return ArmControl::Disarm;
    }
    match derive_control_mode(state) {
        Some(mode) if mode != MODE_NONE => ArmControl::Arm { mode },
        _ => ArmControl::SelectModeFirst,
    }
}

/// Cartesian end-effector position in millimetres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X position (mm)
    pub x: f64,
    /// Y position (mm)
    pub y: f64,
    /// Z position (mm)
    pub z: f64,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X {:.2} mm, Y {:.2} mm, Z {:.2} mm", self.x, self.y, self.z)
    }
}

/// Position from `cpos`, converted from micrometres
pub fn derive_position_mm(state: &HardwareState) -> Option<Position> {
    let cpos = state.variable(keys::POSITION)?.as_array()?;
    let axis = |i: usize| cpos.get(i).and_then(Value::as_f64).map(|v| v / MICRONS_PER_MM);
    Some(Position {
        x: axis(0)?,
        y: axis(1)?,
        z: axis(2)?,
    })
}
