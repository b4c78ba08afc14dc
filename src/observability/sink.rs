//! Observation sink fed by the session controller
//!
//! The controller hands every analyzed message and every state transition to
//! an [`ObservationSink`]. The default [`LogSink`] turns them into structured
//! tracing events; tests substitute a recording sink.

use crate::analysis::ContentReport;
use crate::protocol::DeliveryQos;
use crate::session::ConnectionState;
use crate::transport::EngineFault;
use serde::Serialize;
use tracing::{debug, info};

/// Everything observed about one inbound message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageObservation {
    /// Position of this message in the run; equals the counter after increment
    pub sequence: u64,
    pub topic: String,
    pub qos: DeliveryQos,
    pub retain: bool,
    pub payload_len: usize,
    pub report: ContentReport,
}

impl MessageObservation {
    pub fn kind(&self) -> &'static str {
        match self.report {
            ContentReport::Structured(_) => "structured",
            ContentReport::Text(_) => "text",
        }
    }
}

pub trait ObservationSink: Send + Sync {
    fn record_message(&self, observation: &MessageObservation);

    fn record_transition(&self, from: ConnectionState, to: ConnectionState);

    /// A CONNACK arrived; `session_present` tells whether the broker resumed state
    fn record_session(&self, _session_present: bool) {}

    fn record_fault(&self, _fault: &EngineFault) {}
}

/// Sink that emits tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ObservationSink for LogSink {
    fn record_message(&self, observation: &MessageObservation) {
        let report = serde_json::to_string(&observation.report).unwrap_or_default();
        info!(
            sequence = observation.sequence,
            topic = %observation.topic,
            qos = u8::from(observation.qos),
            retain = observation.retain,
            payload_len = observation.payload_len,
            kind = observation.kind(),
            report = %report,
            "Message received"
        );
    }

    fn record_transition(&self, from: ConnectionState, to: ConnectionState) {
        debug!(from = %from, to = %to, "Connection state changed");
    }
}
