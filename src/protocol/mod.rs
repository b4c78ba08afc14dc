//! Broker-facing data types and topic rules
//!
//! This module defines the message structures that flow between the protocol
//! engine and the session controller, plus MQTT topic filter validation.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
