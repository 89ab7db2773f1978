//! Simulated device
//!
//! An in-process stand-in for the hardware. It accepts requests and commands
//! through the [`Transport`] trait and answers with telemetry patches on a
//! channel, the same way a real link would deliver them. Used by the
//! headless binary and by session tests.

use crate::transport::{CommandMessage, RequestMessage, Transport};
use deltakit_core::data::{keys, MODE_NONE, SUPERVISOR_ARMED, SUPERVISOR_IDLE};
use deltakit_core::{StatePatch, TransportError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Internal model of the simulated machine
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceModel {
    /// Supervisor state, `IDLE` or `ARMED`
    pub supervisor: String,
    /// Selected control mode, `NONE` when unset
    pub mode: String,
    /// Path interpolator flag, 1 while moving
    pub pathing_state: i64,
    /// Position in micrometres
    pub cpos: [i64; 3],
}

impl Default for DeviceModel {
    fn default() -> Self {
        Self {
            supervisor: SUPERVISOR_IDLE.to_string(),
            mode: MODE_NONE.to_string(),
            pathing_state: 0,
            cpos: [0, 0, 0],
        }
    }
}

impl DeviceModel {
    fn report(&self, variable: &str) -> Option<StatePatch> {
        let patch = match variable {
            "super" => StatePatch::new().with(
                "super",
                json!({"supervisor": self.supervisor, "mode": self.mode}),
            ),
            "moStat" => StatePatch::new().with(keys::PATHING_STATE, self.pathing_state),
            keys::POSITION => StatePatch::new().with(keys::POSITION, json!(self.cpos)),
            _ => return None,
        };
        Some(patch)
    }

    fn full_report(&self) -> StatePatch {
        StatePatch::new()
            .with(
                "super",
                json!({"supervisor": self.supervisor, "mode": self.mode}),
            )
            .with("moStat", json!({"pathing_state": self.pathing_state}))
            .with(keys::POSITION, json!(self.cpos))
    }

    fn armed(&self) -> bool {
        self.supervisor == SUPERVISOR_ARMED
    }
}

/// Device simulator implementing the outbound transport
pub struct SimulatedDevice {
    model: Mutex<DeviceModel>,
    connected: AtomicBool,
    patches: mpsc::UnboundedSender<StatePatch>,
}

impl SimulatedDevice {
    /// Create a device and the receiver its telemetry arrives on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatePatch>) {
        Self::with_model(DeviceModel::default())
    }

    /// Create a device starting from `model`
    pub fn with_model(model: DeviceModel) -> (Self, mpsc::UnboundedReceiver<StatePatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                model: Mutex::new(model),
                connected: AtomicBool::new(true),
                patches: tx,
            },
            rx,
        )
    }

    /// Copy of the device's internal model
    pub fn model(&self) -> DeviceModel {
        self.model.lock().clone()
    }

    /// Finish any motion in progress
    pub fn complete_motion(&self) {
        let mut model = self.model.lock();
        if model.pathing_state != 0 {
            model.pathing_state = 0;
            if let Some(patch) = model.report("moStat") {
                self.publish(patch);
            }
        }
    }

    /// Simulate a dropped link; sends fail until [`reconnect`](Self::reconnect)
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("Simulated device disconnected");
    }

    /// Restore the link and resend the full device state
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        let patch = self.model.lock().full_report();
        tracing::info!("Simulated device reconnected, resyncing");
        self.publish(patch);
    }

    fn ensure_connected(&self, what: &str) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Unavailable {
                reason: format!("simulated device disconnected, dropped {}", what),
            })
        }
    }

    fn publish(&self, patch: StatePatch) {
        if self.patches.send(patch).is_err() {
            tracing::debug!("Simulated device telemetry has no receiver");
        }
    }

    fn execute(model: &mut DeviceModel, command: &CommandMessage) -> Vec<&'static str> {
        match command.name.as_str() {
            "arm" => {
                if model.mode == MODE_NONE {
                    tracing::warn!("Simulated device refused arm: no control mode");
                } else {
                    model.supervisor = SUPERVISOR_ARMED.to_string();
                }
                vec!["super"]
            }
            "disarm" => {
                model.supervisor = SUPERVISOR_IDLE.to_string();
                model.pathing_state = 0;
                vec!["super", "moStat"]
            }
            "home" => {
                model.cpos = [0, 0, 0];
                vec![keys::POSITION]
            }
            "set_mode" => {
                match command.args.get("mode").and_then(Value::as_str) {
                    Some(mode) if !model.armed() => model.mode = mode.to_string(),
                    Some(_) => tracing::warn!("Simulated device refused mode change while armed"),
                    None => tracing::warn!("Simulated device: set_mode without 'mode'"),
                }
                vec!["super"]
            }
            "move_to" => {
                if !model.armed() {
                    tracing::warn!("Simulated device refused move while disarmed");
                    return vec!["moStat"];
                }
                for (axis, name) in ["x", "y", "z"].iter().enumerate() {
                    if let Some(mm) = command.args.get(*name).and_then(Value::as_f64) {
                        model.cpos[axis] = (mm * 1000.0).round() as i64;
                    }
                }
                model.pathing_state = 1;
                vec!["moStat", keys::POSITION]
            }
            other => {
                tracing::warn!("Simulated device ignored unknown command '{}'", other);
                Vec::new()
            }
        }
    }
}

impl Transport for SimulatedDevice {
    fn name(&self) -> &str {
        "simulated"
    }

    fn is_available(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send_request(&self, request: RequestMessage) -> Result<(), TransportError> {
        self.ensure_connected(&format!("request {}", request.variable))?;
        let report = self.model.lock().report(&request.variable);
        match report {
            Some(patch) => self.publish(patch),
            None => tracing::debug!(
                "Simulated device has no variable '{}'",
                request.variable
            ),
        }
        Ok(())
    }

    fn send_command(&self, command: CommandMessage) -> Result<(), TransportError> {
        self.ensure_connected(&format!("command {}", command.name))?;
        let patches: Vec<StatePatch> = {
            let mut model = self.model.lock();
            let changed = Self::execute(&mut model, &command);
            changed.iter().filter_map(|v| model.report(v)).collect()
        };
        for patch in patches {
            self.publish(patch);
        }
        Ok(())
    }
}

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDevice")
            .field("model", &*self.model.lock())
            .field("connected", &self.is_available())
            .finish()
    }
}
