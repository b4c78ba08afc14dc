//! Broker session management
//!
//! - [`state`] - pure connection state machine
//! - [`stats`] - run statistics and snapshots
//! - [`subscriber`] - subscription issue on every new connection
//! - [`controller`] - the event loop tying them together

pub mod controller;
pub mod state;
pub mod stats;
pub mod subscriber;

pub use controller::{
    DiagnosticOutcome, SessionCommand, SessionConfig, SessionController, SessionError,
    SessionHandle,
};
pub use state::ConnectionState;
pub use stats::{RunStats, StatsSnapshot};
pub use subscriber::TopicSubscriber;
