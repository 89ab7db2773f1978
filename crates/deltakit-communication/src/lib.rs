//! # DeltaKit Communication
//!
//! Outbound side of the device link and the session that ties it to the
//! telemetry hub.
//!
//! - [`transport`]: the `Transport` contract plus no-op and channel adapters
//! - [`scheduler`]: coalesced periodic variable requests
//! - [`dispatcher`]: interlock-gated device commands
//! - [`simulator`]: an in-process device for headless runs and tests
//! - [`session`]: hub, scheduler and dispatcher wired to one transport

pub mod dispatcher;
pub mod scheduler;
pub mod session;
pub mod simulator;
pub mod transport;

pub use dispatcher::{CommandDispatcher, Interlock, SentCommand, CMD_ARM, CMD_DISARM, CMD_HOME};
pub use scheduler::{IntervalRequestScheduler, OwnerId, SchedulerStats, DEFAULT_MIN_INTERVAL};
pub use session::{ControlSession, CMD_MOVE_TO, CMD_SET_MODE, SESSION_OWNER};
pub use simulator::{DeviceModel, SimulatedDevice};
pub use transport::{
    ChannelTransport, CommandMessage, NoOpTransport, OutboundMessage, RequestMessage,
    SharedTransport, Transport,
};
