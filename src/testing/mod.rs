//! Testing utilities and mock implementations
//!
//! Lets the session controller run against a scripted engine instead of a
//! live broker, and the rumqttc engine against a loopback socket.

pub mod broker;
pub mod mocks;

pub use broker::{BrokerConnection, LoopbackBroker};
pub use mocks::*;
