//! Error handling for DeltaKit
//!
//! Provides error types for every layer of the synchronization core:
//! - State errors (malformed inbound patches)
//! - Selector errors (projection failures, isolated per subscription)
//! - Command errors (local interlocks, unknown commands)
//! - Transport errors (outbound messages that cannot be delivered)
//! - Scheduler errors (invalid polling demand)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// State store error type
///
/// Raised when an inbound patch cannot be merged into the telemetry snapshot.
/// The snapshot is left untouched whenever one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// A patch key could not be parsed as a telemetry path
    #[error("Malformed patch: invalid path '{path}': {reason}")]
    InvalidPath {
        /// The offending path text.
        path: String,
        /// Why the path was rejected.
        reason: String,
    },

    /// A patch key conflicts with the existing structure of the snapshot
    #[error("Malformed patch: path '{path}' conflicts with existing value at '{prefix}'")]
    PathConflict {
        /// The path being written.
        path: String,
        /// The prefix holding a non-container value.
        prefix: String,
    },

    /// An array index points past the end of the array
    #[error("Malformed patch: index {index} out of range for '{path}' (length {len})")]
    IndexOutOfRange {
        /// The path being written.
        path: String,
        /// The requested index.
        index: usize,
        /// The current array length.
        len: usize,
    },

    /// The patch payload was not a JSON object
    #[error("Malformed patch: {reason}")]
    InvalidPayload {
        /// Why the payload was rejected.
        reason: String,
    },
}

/// Selector error type
///
/// Returned by a selector that cannot project the current snapshot.
/// The engine logs it and keeps the subscription's previous value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    /// A required telemetry path is absent
    #[error("Missing telemetry value at '{path}'")]
    Missing {
        /// The absent path.
        path: String,
    },

    /// A telemetry value had an unexpected type
    #[error("Unexpected type at '{path}': expected {expected}")]
    TypeMismatch {
        /// The path that was read.
        path: String,
        /// A description of the expected type.
        expected: String,
    },

    /// The selector panicked during evaluation
    #[error("Selector panicked: {message}")]
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },

    /// Generic selector failure
    #[error("Selector failed: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

/// Command error type
///
/// Represents local rejections by the command dispatcher. Nothing reaches
/// the transport when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The command's interlock predicate did not hold
    #[error("Interlock violation: '{command}' not permitted: {reason}")]
    InterlockViolation {
        /// The rejected command.
        command: String,
        /// Why the interlock failed.
        reason: String,
    },

    /// No command with this name is registered
    #[error("Unknown command: {command}")]
    UnknownCommand {
        /// The unrecognised command name.
        command: String,
    },

    /// The command passed its interlock but could not be delivered
    #[error("Command '{command}' dropped: {source}")]
    Transport {
        /// The undelivered command.
        command: String,
        /// The underlying transport failure.
        #[source]
        source: TransportError,
    },
}

/// Transport error type
///
/// Represents failures of the outbound side of the device link.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport cannot currently accept messages
    #[error("Transport unavailable: {reason}")]
    Unavailable {
        /// Why the transport is unavailable.
        reason: String,
    },
}

/// Scheduler error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// A polling interval of zero was requested
    #[error("Invalid polling interval for '{variable}': interval must be > 0")]
    InvalidInterval {
        /// The variable being requested.
        variable: String,
    },

    /// No async runtime was available to drive timers
    #[error("No async runtime available: {reason}")]
    NoRuntime {
        /// The runtime lookup failure.
        reason: String,
    },
}

/// Main error type for DeltaKit
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// State store error
    #[error(transparent)]
    State(#[from] StateError),

    /// Selector error
    #[error(transparent)]
    Selector(#[from] SelectorError),

    /// Command error
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Scheduler error
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a malformed patch
    pub fn is_malformed_patch(&self) -> bool {
        matches!(self, Error::State(_))
    }

    /// Check if this is a local interlock rejection
    pub fn is_interlock_violation(&self) -> bool {
        matches!(
            self,
            Error::Command(CommandError::InterlockViolation { .. })
        )
    }

    /// Check if this is a transport availability error
    pub fn is_transport_unavailable(&self) -> bool {
        matches!(
            self,
            Error::Transport(TransportError::Unavailable { .. })
                | Error::Command(CommandError::Transport { .. })
        )
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interlock_classification() {
        let err: Error = CommandError::InterlockViolation {
            command: "arm".to_string(),
            reason: "no control mode selected".to_string(),
        }
        .into();
        assert!(err.is_interlock_violation());
        assert!(!err.is_transport_unavailable());
        assert!(err.to_string().contains("arm"));
    }

    #[test]
    fn test_command_transport_failure_is_unavailable() {
        let err: Error = CommandError::Transport {
            command: "home".to_string(),
            source: TransportError::Unavailable {
                reason: "link down".to_string(),
            },
        }
        .into();
        assert!(err.is_transport_unavailable());
    }

    #[test]
    fn test_state_error_is_malformed() {
        let err: Error = StateError::PathConflict {
            path: "super.mode".to_string(),
            prefix: "super".to_string(),
        }
        .into();
        assert!(err.is_malformed_patch());
        assert!(err.to_string().contains("super.mode"));
    }
}
