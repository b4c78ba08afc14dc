//! Pure routing and fault classification for rumqttc events
//!
//! These functions hold no state and do no I/O, so the event pump stays a
//! thin loop and everything interesting here is unit tested.

use super::connection::from_rumqttc_qos;
use crate::protocol::{DeliveryQos, InboundMessage};
use crate::transport::{EngineFault, FaultKind, Subscription, SubscriptionGrant};
use chrono::Utc;
use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::Event;
use std::io;

/// Routing decisions for rumqttc events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK received
    ConnectionAcknowledged { session_present: bool },
    /// PUBLISH received from the broker
    MessageReceived(InboundMessage),
    /// SUBACK received; one outcome per requested filter, in request order
    SubscriptionAcknowledged {
        outcomes: Vec<Result<DeliveryQos, String>>,
    },
    /// Broker sent DISCONNECT
    Disconnected { reason: Option<String> },
    /// Our own DISCONNECT went out on the wire
    DisconnectSent,
    /// Keepalive traffic and acknowledgements
    InfrastructureEvent(String),
    /// Any other outgoing packet
    OutgoingEvent,
}

/// Route a rumqttc event to the pump's handling (pure routing decision)
pub fn route_mqtt_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                session_present: connack.session_present,
            },
            Packet::Publish(publish) => {
                let topic = String::from_utf8_lossy(&publish.topic).to_string();
                let mut message =
                    InboundMessage::new(topic, publish.payload.to_vec(), from_rumqttc_qos(publish.qos));
                message.retain = publish.retain;
                message.packet_id = (publish.qos != QoS::AtMostOnce).then_some(publish.pkid);
                message.received_at = Utc::now();
                EventRoute::MessageReceived(message)
            }
            Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged {
                outcomes: suback.return_codes.iter().map(subscribe_outcome).collect(),
            },
            Packet::Disconnect(disconnect) => EventRoute::Disconnected {
                reason: Some(format!("{:?}", disconnect.reason_code)),
            },
            other => EventRoute::InfrastructureEvent(format!("{other:?}")),
        },
        Event::Outgoing(rumqttc::Outgoing::Disconnect) => EventRoute::DisconnectSent,
        Event::Outgoing(_) => EventRoute::OutgoingEvent,
    }
}

fn subscribe_outcome(code: &SubscribeReasonCode) -> Result<DeliveryQos, String> {
    match code {
        SubscribeReasonCode::Success(qos) => Ok(from_rumqttc_qos(*qos)),
        other => Err(format!("{other:?}")),
    }
}

/// Pair SUBACK outcomes with the filters that were requested
///
/// Outcomes beyond the requested list are labelled with a placeholder filter
/// so a broker returning too many codes is still visible in the logs.
pub fn resolve_grants(
    requested: &[Subscription],
    outcomes: Vec<Result<DeliveryQos, String>>,
) -> Vec<SubscriptionGrant> {
    outcomes
        .into_iter()
        .enumerate()
        .map(|(index, outcome)| {
            let filter = requested
                .get(index)
                .map(|s| s.filter.clone())
                .unwrap_or_else(|| format!("<unrequested #{index}>"));
            match outcome {
                Ok(qos) => SubscriptionGrant::Granted { filter, qos },
                Err(reason) => SubscriptionGrant::Rejected { filter, reason },
            }
        })
        .collect()
}

/// Classify any error raised by the event loop
///
/// The source chain is searched for an `io::Error` first, since its kind is
/// more reliable than message text. Everything else falls back to the
/// rendered message.
pub fn classify_error(error: &(dyn std::error::Error + 'static)) -> EngineFault {
    let message = error.to_string();
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(io_error) = err.downcast_ref::<io::Error>() {
            return EngineFault::new(classify_io_error(io_error), message);
        }
        current = err.source();
    }
    EngineFault::new(classify_fault_message(&message), message)
}

pub fn classify_io_error(error: &io::Error) -> FaultKind {
    match error.kind() {
        io::ErrorKind::ConnectionRefused => FaultKind::ConnectionRefused,
        io::ErrorKind::TimedOut => FaultKind::Timeout,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => FaultKind::ConnectionReset,
        _ => classify_fault_message(&error.to_string()),
    }
}

/// Classify a fault from its message text (pure function)
pub fn classify_fault_message(message: &str) -> FaultKind {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&[
        "lookup address",
        "name or service not known",
        "nodename nor servname",
        "no such host",
        "dns",
        "resolve",
    ]) {
        FaultKind::DnsResolution
    } else if has(&["refused", "not authorized", "bad user name"]) {
        FaultKind::ConnectionRefused
    } else if has(&["timed out", "timeout", "elapsed"]) {
        FaultKind::Timeout
    } else if has(&["tls", "certificate", "handshake", "x509"]) {
        FaultKind::Tls
    } else if has(&["reset", "broken pipe", "aborted", "eof"]) {
        FaultKind::ConnectionReset
    } else if has(&["mqtt state", "protocol", "packet", "connack", "malformed"]) {
        FaultKind::Protocol
    } else {
        FaultKind::Other
    }
}
