//! Message types shared by the transport and session layers
//!
//! These are engine-neutral: the rumqttc adapter converts its own packet types
//! into [`InboundMessage`] before anything else in the crate sees them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// MQTT delivery guarantee level
///
/// # Examples
/// ```
/// use topicwatch::protocol::DeliveryQos;
///
/// let qos = DeliveryQos::try_from(1).unwrap();
/// assert_eq!(qos, DeliveryQos::AtLeastOnce);
/// assert_eq!(u8::from(qos), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum DeliveryQos {
    /// QoS 0
    #[default]
    AtMostOnce,
    /// QoS 1
    AtLeastOnce,
    /// QoS 2
    ExactlyOnce,
}

#[derive(Debug, Error, PartialEq)]
#[error("Invalid QoS level: {0} (expected 0, 1 or 2)")]
pub struct InvalidQos(pub u8);

impl TryFrom<u8> for DeliveryQos {
    type Error = InvalidQos;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DeliveryQos::AtMostOnce),
            1 => Ok(DeliveryQos::AtLeastOnce),
            2 => Ok(DeliveryQos::ExactlyOnce),
            other => Err(InvalidQos(other)),
        }
    }
}

impl From<DeliveryQos> for u8 {
    fn from(qos: DeliveryQos) -> Self {
        match qos {
            DeliveryQos::AtMostOnce => 0,
            DeliveryQos::AtLeastOnce => 1,
            DeliveryQos::ExactlyOnce => 2,
        }
    }
}

/// A single delivery from the broker
///
/// Created by the protocol engine and consumed exactly once by the session
/// controller's message path. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: DeliveryQos,
    pub retain: bool,
    /// Present for QoS 1 and 2 deliveries
    pub packet_id: Option<u16>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Build a message stamped with the current time
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: DeliveryQos) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain: false,
            packet_id: None,
            received_at: Utc::now(),
        }
    }
}

/// Self-describing status record used as the default diagnostic payload
/// and, with `status = "offline"`, as the default last-will payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub client_id: String,
    pub status: ClientStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages_received: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Online,
    Offline,
}

impl StatusReport {
    pub fn online(client_id: &str, messages_received: u64) -> Self {
        Self {
            client_id: client_id.to_string(),
            status: ClientStatus::Online,
            messages_received: Some(messages_received),
            timestamp: Utc::now(),
        }
    }

    pub fn offline(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            status: ClientStatus::Offline,
            messages_received: None,
            timestamp: Utc::now(),
        }
    }
}
