//! Command dispatcher
//!
//! Gates device commands behind per-command interlocks evaluated against the
//! current telemetry snapshot. A command that fails its interlock never
//! reaches the transport. The dispatcher does not touch state: the device's
//! reaction arrives later as telemetry.

use crate::transport::{CommandMessage, SharedTransport};
use chrono::{DateTime, Utc};
use deltakit_core::{control_mode_selected, CommandError, HardwareState};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Arm the machine; requires a selected control mode
pub const CMD_ARM: &str = "arm";
/// Disarm the machine
pub const CMD_DISARM: &str = "disarm";
/// Home all axes
pub const CMD_HOME: &str = "home";

type Predicate = Arc<dyn Fn(&HardwareState) -> bool + Send + Sync>;

/// Precondition a command must satisfy before it is sent
#[derive(Clone)]
pub struct Interlock {
    description: String,
    predicate: Predicate,
}

impl Interlock {
    /// Create an interlock from a pure predicate over telemetry
    pub fn new<P>(description: impl Into<String>, predicate: P) -> Self
    where
        P: Fn(&HardwareState) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Interlock that always passes
    pub fn none() -> Self {
        Self::new("none", |_| true)
    }

    /// Passes only when a control mode other than `NONE` is selected
    pub fn control_mode_selected() -> Self {
        Self::new("a control mode must be selected", control_mode_selected)
    }

    /// Evaluate against a snapshot
    pub fn check(&self, state: &HardwareState) -> bool {
        (self.predicate)(state)
    }

    /// What the interlock requires
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Interlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Interlock").field(&self.description).finish()
    }
}

/// A command that was handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    /// The delivered command
    pub message: CommandMessage,
    /// When it was handed to the transport
    pub sent_at: DateTime<Utc>,
}

/// Interlock-gated command sender
pub struct CommandDispatcher {
    transport: SharedTransport,
    commands: RwLock<HashMap<String, Interlock>>,
    last_sent: Mutex<Option<SentCommand>>,
    sent_count: AtomicU64,
}

impl CommandDispatcher {
    /// Create a dispatcher with the built-in commands registered
    pub fn new(transport: SharedTransport) -> Self {
        let dispatcher = Self::empty(transport);
        dispatcher.register(CMD_ARM, Interlock::control_mode_selected());
        dispatcher.register(CMD_DISARM, Interlock::none());
        dispatcher.register(CMD_HOME, Interlock::none());
        dispatcher
    }

    /// Create a dispatcher with no commands registered
    pub fn empty(transport: SharedTransport) -> Self {
        Self {
            transport,
            commands: RwLock::new(HashMap::new()),
            last_sent: Mutex::new(None),
            sent_count: AtomicU64::new(0),
        }
    }

    /// Register or replace the interlock for `name`
    pub fn register(&self, name: impl Into<String>, interlock: Interlock) {
        let name = name.into();
        tracing::debug!("Registered command '{}' ({})", name, interlock.description());
        self.commands.write().insert(name, interlock);
    }

    /// Whether `name` is a known command
    pub fn is_registered(&self, name: &str) -> bool {
        self.commands.read().contains_key(name)
    }

    /// Registered command names, sorted
    pub fn commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `name` would currently pass its interlock
    pub fn can_send(&self, name: &str, state: &HardwareState) -> bool {
        self.commands
            .read()
            .get(name)
            .is_some_and(|interlock| interlock.check(state))
    }

    /// Check the interlock for `name` against `state` and, if it holds,
    /// hand the command to the transport
    pub fn send(&self, name: &str, args: Value, state: &HardwareState) -> Result<(), CommandError> {
        // Clone out so the predicate runs without holding the registry lock.
        let interlock = self.commands.read().get(name).cloned();
        let Some(interlock) = interlock else {
            tracing::warn!("Rejected unknown command '{}'", name);
            return Err(CommandError::UnknownCommand {
                command: name.to_string(),
            });
        };

        if !interlock.check(state) {
            tracing::warn!(
                "Interlock blocked '{}': {}",
                name,
                interlock.description()
            );
            return Err(CommandError::InterlockViolation {
                command: name.to_string(),
                reason: interlock.description().to_string(),
            });
        }

        let message = CommandMessage::new(name, args);
        if let Err(e) = self.transport.send_command(message.clone()) {
            tracing::warn!("Command '{}' not delivered: {}", name, e);
            return Err(CommandError::Transport {
                command: name.to_string(),
                source: e,
            });
        }

        tracing::info!("Sent command '{}' {}", name, message.args);
        *self.last_sent.lock() = Some(SentCommand {
            message,
            sent_at: Utc::now(),
        });
        self.sent_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Most recent command delivered to the transport
    pub fn last_sent(&self) -> Option<SentCommand> {
        self.last_sent.lock().clone()
    }

    /// Number of commands delivered to the transport
    pub fn sent_count(&self) -> u64 {
        self.sent_count.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("transport", &self.transport.name())
            .field("commands", &self.commands())
            .field("sent_count", &self.sent_count())
            .finish()
    }
}
