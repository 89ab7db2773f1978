//! Channel-backed transport
//!
//! Forwards outbound messages over an unbounded tokio channel to whatever
//! task owns the real link (or to a test).

use super::{CommandMessage, OutboundMessage, RequestMessage, Transport};
use deltakit_core::TransportError;
use tokio::sync::mpsc;

/// Transport that queues outbound messages on a channel
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    name: String,
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl ChannelTransport {
    /// Create a transport and the receiver its messages arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        Self::named("channel")
    }

    /// Create a named transport
    pub fn named(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }

    fn forward(&self, message: OutboundMessage) -> Result<(), TransportError> {
        self.tx
            .send(message)
            .map_err(|e| TransportError::Unavailable {
                reason: format!("{} receiver closed, dropped {}", self.name, e.0),
            })
    }
}

impl Transport for ChannelTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        !self.tx.is_closed()
    }

    fn send_request(&self, request: RequestMessage) -> Result<(), TransportError> {
        self.forward(OutboundMessage::Request(request))
    }

    fn send_command(&self, command: CommandMessage) -> Result<(), TransportError> {
        self.forward(OutboundMessage::Command(command))
    }
}
