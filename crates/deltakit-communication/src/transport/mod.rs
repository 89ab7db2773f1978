//! Transport contract
//!
//! The byte-level link to the device is an external collaborator. This
//! module defines the messages the synchronization core hands to it and the
//! trait an adapter implements. Inbound telemetry travels the other way as
//! [`StatePatch`](deltakit_core::StatePatch) values.

mod channel;

pub use channel::ChannelTransport;

use deltakit_core::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Ask the device to report a variable
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestMessage {
    /// Top-level telemetry variable name
    pub variable: String,
}

impl RequestMessage {
    /// Create a request for `variable`
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }
}

/// Instruct the device to perform an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    /// Command name, e.g. `arm`
    pub name: String,
    /// Command arguments
    pub args: Value,
}

impl CommandMessage {
    /// Create a command message
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Anything the core sends to the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutboundMessage {
    /// Periodic variable request
    Request(RequestMessage),
    /// Device command
    Command(CommandMessage),
}

impl fmt::Display for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundMessage::Request(r) => write!(f, "request {}", r.variable),
            OutboundMessage::Command(c) => write!(f, "command {} {}", c.name, c.args),
        }
    }
}

/// Outbound side of the device link
///
/// Sends are fire-and-forget: they must not block, and must not call back
/// synchronously into the scheduler or dispatcher that invoked them.
pub trait Transport: Send + Sync {
    /// Adapter name for logging
    fn name(&self) -> &str;

    /// Whether the link can currently accept messages
    fn is_available(&self) -> bool;

    /// Hand a variable request to the link
    fn send_request(&self, request: RequestMessage) -> Result<(), TransportError>;

    /// Hand a command to the link
    fn send_command(&self, command: CommandMessage) -> Result<(), TransportError>;
}

/// Transport shared between the scheduler, dispatcher and session
pub type SharedTransport = Arc<dyn Transport>;

/// Transport with no device behind it
///
/// Every send fails with `TransportUnavailable`; used before a link is
/// configured.
#[derive(Debug, Clone, Default)]
pub struct NoOpTransport;

impl NoOpTransport {
    /// Create a no-op transport
    pub fn new() -> Self {
        Self
    }
}

impl Transport for NoOpTransport {
    fn name(&self) -> &str {
        "no-op"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn send_request(&self, request: RequestMessage) -> Result<(), TransportError> {
        Err(TransportError::Unavailable {
            reason: format!("no transport configured for request '{}'", request.variable),
        })
    }

    fn send_command(&self, command: CommandMessage) -> Result<(), TransportError> {
        Err(TransportError::Unavailable {
            reason: format!("no transport configured for command '{}'", command.name),
        })
    }
}
