//! Control session
//!
//! Wires the hardware hub, request scheduler and command dispatcher to one
//! transport. Inbound telemetry is applied by a single pump task in arrival
//! order; commands are checked against whatever snapshot the hub holds at the
//! moment they are sent. Nothing here updates state optimistically: a
//! command's effect becomes visible only once the device reports it.

use crate::dispatcher::{CommandDispatcher, Interlock};
use crate::scheduler::{IntervalRequestScheduler, OwnerId};
use crate::transport::SharedTransport;
use deltakit_core::{
    derive_arm_control, derive_position_mm, derive_supervisor_label, AppliedPatch, ArmControl,
    CommandError, Error, HardwareHub, HardwareState, Position, Result, SchedulerError,
    SelectorError, StateError, StatePatch, SubscriptionId, SupervisorState,
};
use deltakit_settings::TelemetrySettings;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Owner id the session polls its configured variables under
pub const SESSION_OWNER: &str = "session";
/// Select the control mode; only while disarmed
pub const CMD_SET_MODE: &str = "set_mode";
/// Move to `{x, y, z}` in millimetres; only while armed
pub const CMD_MOVE_TO: &str = "move_to";

/// One connection's worth of telemetry sync and control
pub struct ControlSession {
    config: TelemetrySettings,
    hub: Arc<HardwareHub>,
    scheduler: IntervalRequestScheduler,
    dispatcher: CommandDispatcher,
    runtime: Handle,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ControlSession {
    /// Create a session on the current tokio runtime
    pub fn new(config: &TelemetrySettings, transport: SharedTransport) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| SchedulerError::NoRuntime {
            reason: e.to_string(),
        })?;

        let scheduler = IntervalRequestScheduler::with_runtime(transport.clone(), runtime.clone())
            .with_min_interval(Duration::from_millis(config.min_poll_interval_ms));

        let dispatcher = CommandDispatcher::new(transport.clone());
        dispatcher.register(
            CMD_SET_MODE,
            Interlock::new("the machine must be disarmed", |state: &HardwareState| {
                !SupervisorState::from_state(state).is_armed()
            }),
        );
        dispatcher.register(
            CMD_MOVE_TO,
            Interlock::new("the machine must be armed", |state: &HardwareState| {
                SupervisorState::from_state(state).is_armed()
            }),
        );

        tracing::info!("Control session created on '{}' transport", transport.name());
        Ok(Self {
            config: config.clone(),
            hub: Arc::new(HardwareHub::new()),
            scheduler,
            dispatcher,
            runtime,
            pump: Mutex::new(None),
        })
    }

    /// Apply inbound telemetry from `inbound` in arrival order
    ///
    /// Replaces any previously attached receiver.
    pub fn attach_inbound(&self, mut inbound: mpsc::UnboundedReceiver<StatePatch>) {
        let hub = self.hub.clone();
        let handle = self.runtime.spawn(async move {
            while let Some(patch) = inbound.recv().await {
                if let Err(e) = hub.apply_patch(&patch) {
                    tracing::debug!("Inbound patch dropped: {}", e);
                }
            }
            tracing::debug!("Inbound telemetry stream closed");
        });

        if let Some(previous) = self.pump.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Apply one inbound patch directly
    pub fn on_state_patch(&self, patch: &StatePatch) -> std::result::Result<AppliedPatch, StateError> {
        self.hub.apply_patch(patch)
    }

    /// Poll every configured variable at the default interval
    pub fn start_polling(&self) -> Result<usize> {
        for variable in &self.config.poll_variables {
            self.scheduler
                .request(variable, self.config.default_poll_interval_ms, SESSION_OWNER)?;
        }
        Ok(self.config.poll_variables.len())
    }

    /// Register `owner`'s demand for `variable`
    pub fn request(
        &self,
        variable: &str,
        interval_ms: u64,
        owner: impl Into<OwnerId>,
    ) -> std::result::Result<Duration, SchedulerError> {
        self.scheduler.request(variable, interval_ms, owner)
    }

    /// Register `owner`'s demand for `variable` at the configured default interval
    pub fn request_default(
        &self,
        variable: &str,
        owner: impl Into<OwnerId>,
    ) -> std::result::Result<Duration, SchedulerError> {
        self.scheduler
            .request(variable, self.config.default_poll_interval_ms, owner)
    }

    /// Drop every demand held by `owner`
    pub fn release(&self, owner: impl Into<OwnerId>) -> usize {
        self.scheduler.release(owner)
    }

    /// Send a command, checked against the current snapshot
    pub fn send(&self, name: &str, args: Value) -> std::result::Result<(), CommandError> {
        let snapshot = self.hub.snapshot();
        self.dispatcher.send(name, args, snapshot.state())
    }

    /// Act on the arm control: arm, disarm, or refuse when no mode is selected
    pub fn press_arm_control(&self) -> std::result::Result<ArmControl, CommandError> {
        let control = self.arm_control();
        match control.command() {
            Some(command) => {
                self.send(command, Value::Object(Default::default()))?;
                Ok(control)
            }
            None => Err(CommandError::InterlockViolation {
                command: crate::dispatcher::CMD_ARM.to_string(),
                reason: control.label(),
            }),
        }
    }

    /// Register a selector on the session's hub
    pub fn subscribe<T, S, F>(&self, selector: S, on_change: F) -> SubscriptionId
    where
        T: PartialEq + Clone + Send + 'static,
        S: Fn(&HardwareState) -> std::result::Result<T, SelectorError> + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.hub.subscribe(selector, on_change)
    }

    /// Subscribe to the value at a telemetry path
    pub fn subscribe_path<F>(&self, path: &str, on_change: F) -> Result<SubscriptionId>
    where
        F: Fn(&Option<Value>) + Send + Sync + 'static,
    {
        self.hub.subscribe_path(path, on_change).map_err(Error::from)
    }

    /// Remove a subscription; idempotent
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }

    /// Supervisor label for the current snapshot
    pub fn supervisor_label(&self) -> String {
        derive_supervisor_label(self.hub.snapshot().state())
    }

    /// Supervisor state for the current snapshot
    pub fn supervisor_state(&self) -> SupervisorState {
        SupervisorState::from_state(self.hub.snapshot().state())
    }

    /// What the arm control offers for the current snapshot
    pub fn arm_control(&self) -> ArmControl {
        derive_arm_control(self.hub.snapshot().state())
    }

    /// Current position in millimetres
    pub fn position_mm(&self) -> Option<Position> {
        derive_position_mm(self.hub.snapshot().state())
    }

    /// Get the hardware hub
    pub fn hub(&self) -> &Arc<HardwareHub> {
        &self.hub
    }

    /// Get the request scheduler
    pub fn scheduler(&self) -> &IntervalRequestScheduler {
        &self.scheduler
    }

    /// Get the command dispatcher
    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Stop the pump, every poll timer, and every subscription
    pub fn shutdown(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.scheduler.shutdown();
        self.hub.shutdown();
        tracing::info!("Control session shut down at version {}", self.hub.version());
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

impl std::fmt::Debug for ControlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlSession")
            .field("hub", &self.hub)
            .field("scheduler", &self.scheduler)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
