//! Transport layer between the session controller and the protocol engine
//!
//! The wire protocol lives in an external engine. This module defines the
//! narrow seam the session controller drives it through: a connector that
//! builds one engine handle plus an ordered event stream, and the commands the
//! handle accepts. The production implementation over rumqttc is in [`mqtt`].

use crate::protocol::{DeliveryQos, InboundMessage};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;
pub mod options;
pub mod trust;

pub use options::{
    ClientIdentity, ConnectionOptions, Credentials, LastWillDeclaration, Subscription,
    TlsSettings,
};
pub use trust::{load_trust_policy, TrustPolicy, TrustSource};

/// Everything an engine needs to open a session
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub identity: ClientIdentity,
    pub options: ConnectionOptions,
    pub trust: TrustPolicy,
}

/// Builds protocol engine handles
///
/// `connect` must not block on network I/O: it constructs the engine and
/// starts its event pump, and the handshake outcome arrives later as an
/// [`EngineEvent`].
pub trait EngineConnector: Send + Sync {
    type Engine: ProtocolEngine + 'static;

    fn connect(
        &self,
        params: &ConnectParams,
    ) -> Result<(Self::Engine, mpsc::Receiver<EngineEvent>), EngineError>;
}

/// Commands accepted by a live protocol engine
#[async_trait::async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Request a subscription; grants arrive as [`EngineEvent::SubscriptionGranted`]
    async fn subscribe(&self, subscriptions: &[Subscription]) -> Result<(), EngineError>;

    /// Publish a message; returns once the engine accepted it for delivery
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: DeliveryQos,
        retain: bool,
    ) -> Result<(), EngineError>;

    /// End the session. A graceful end sends DISCONNECT and the engine emits
    /// [`EngineEvent::Closed`] once the transport is down; a forced end tears
    /// the transport down immediately.
    async fn end(&mut self, force: bool) -> Result<(), EngineError>;
}

/// Events delivered by the engine, in arrival order, over a single channel
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// CONNACK received
    Connected { session_present: bool },
    /// PUBLISH delivered from the broker
    Message(InboundMessage),
    /// SUBACK received
    SubscriptionGranted { grants: Vec<SubscriptionGrant> },
    /// Transport or protocol failure; the engine keeps retrying on its own
    Error(EngineFault),
    /// Broker sent DISCONNECT
    Disconnected { reason: Option<String> },
    /// A previously established connection was lost
    Offline,
    /// The engine is about to retry the connection
    Reconnecting,
    /// The engine has stopped for good
    Closed,
}

/// Outcome for one requested filter in a SUBACK
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionGrant {
    Granted {
        filter: String,
        qos: DeliveryQos,
    },
    Rejected {
        filter: String,
        reason: String,
    },
}

/// Classified transport failure
#[derive(Debug, Clone, PartialEq)]
pub struct EngineFault {
    pub kind: FaultKind,
    pub message: String,
}

impl EngineFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.diagnosis_tag(), self.message)
    }
}

/// Recoverable transport fault categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    DnsResolution,
    ConnectionRefused,
    Timeout,
    Tls,
    ConnectionReset,
    Protocol,
    Other,
}

impl FaultKind {
    /// Stable tag attached to log events for this fault
    pub fn diagnosis_tag(&self) -> &'static str {
        match self {
            FaultKind::DnsResolution => "dns_failure",
            FaultKind::ConnectionRefused => "connection_refused",
            FaultKind::Timeout => "timeout",
            FaultKind::Tls => "tls_failure",
            FaultKind::ConnectionReset => "connection_reset",
            FaultKind::Protocol => "protocol_error",
            FaultKind::Other => "transport_error",
        }
    }

    /// Human-readable diagnosis hint for operators
    pub fn hint(&self) -> &'static str {
        match self {
            FaultKind::DnsResolution => "broker host name could not be resolved",
            FaultKind::ConnectionRefused => "broker refused the connection; check host, port and credentials",
            FaultKind::Timeout => "broker did not answer in time",
            FaultKind::Tls => "TLS handshake failed; check the CA bundle and broker certificate",
            FaultKind::ConnectionReset => "connection was reset by the peer",
            FaultKind::Protocol => "protocol violation or unexpected packet",
            FaultKind::Other => "unclassified transport failure",
        }
    }
}

/// Errors returned by engine construction and engine commands
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("TLS configuration failed: {0}")]
    Tls(String),
    #[error("Subscription request failed")]
    SubscribeFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Engine is closed")]
    Closed,
}

impl EngineError {
    /// Construction errors are fatal; everything else is reported and survived
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::InvalidBrokerUrl(_) | EngineError::Tls(_))
    }
}
