//! Headless walkthrough against the simulated device
//!
//! Selects a mode, arms, moves, waits for motion to finish and disarms,
//! logging every supervisor transition the telemetry reports.

use deltakit_communication::{ControlSession, SimulatedDevice, CMD_MOVE_TO, CMD_SET_MODE};
use deltakit_core::{
    derive_supervisor_label, thread_safe, CommandError, HardwareState, Position, ThreadSafe,
};
use deltakit_settings::Config;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Owner id for the walkthrough's own telemetry demands
const DEMO_OWNER: &str = "overview";

/// What the walkthrough observed
#[derive(Debug, Clone, PartialEq)]
pub struct DemoReport {
    /// Supervisor labels in the order they were reported
    pub labels: Vec<String>,
    /// Position after the run
    pub final_position: Option<Position>,
    /// Commands delivered to the device
    pub commands_sent: u64,
    /// Telemetry version after the run
    pub version: u64,
}

/// Run the walkthrough; requires a tokio runtime
pub async fn run_simulated(config: &Config, target: Position) -> anyhow::Result<DemoReport> {
    let (device, inbound) = SimulatedDevice::new();
    let device = Arc::new(device);
    let session = ControlSession::new(&config.telemetry, device.clone())?;
    session.attach_inbound(inbound);

    let labels: ThreadSafe<Vec<String>> = thread_safe(Vec::new());
    let sink = labels.clone();
    session.subscribe(
        |state: &HardwareState| Ok(derive_supervisor_label(state)),
        move |label: &String| {
            tracing::info!("Supervisor: {}", label);
            sink.lock().push(label.clone());
        },
    );

    session.start_polling()?;
    session.request_default("super", DEMO_OWNER)?;
    session.request_default("moStat", DEMO_OWNER)?;

    let settle = Duration::from_millis(config.telemetry.default_poll_interval_ms * 2);
    tokio::time::sleep(settle).await;

    match session.press_arm_control() {
        Err(CommandError::InterlockViolation { reason, .. }) => {
            tracing::info!("Arm control unavailable: {}", reason)
        }
        other => anyhow::bail!("expected arming to be refused, got {:?}", other),
    }

    session.send(CMD_SET_MODE, json!({"mode": "TRACK"}))?;
    tokio::time::sleep(settle).await;

    let control = session.press_arm_control()?;
    tracing::info!("Pressed '{}'", control.label());
    tokio::time::sleep(settle).await;

    session.send(
        CMD_MOVE_TO,
        json!({"x": target.x, "y": target.y, "z": target.z}),
    )?;
    tokio::time::sleep(settle).await;
    if let Some(position) = session.position_mm() {
        tracing::info!("Position: {}", position);
    }

    device.complete_motion();
    tokio::time::sleep(settle).await;

    let control = session.press_arm_control()?;
    tracing::info!("Pressed '{}'", control.label());
    tokio::time::sleep(settle).await;

    let report = DemoReport {
        labels: labels.lock().clone(),
        final_position: session.position_mm(),
        commands_sent: session.dispatcher().sent_count(),
        version: session.hub().version(),
    };
    session.release(DEMO_OWNER);
    session.shutdown();
    Ok(report)
}
