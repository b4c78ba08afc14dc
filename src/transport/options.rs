//! Immutable connection inputs built once from configuration

use crate::protocol::DeliveryQos;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Who this process is to the broker
#[derive(Clone, PartialEq)]
pub struct ClientIdentity {
    pub client_id: String,
    pub credentials: Option<Credentials>,
}

#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

// Keep secrets out of logs
impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("client_id", &self.client_id)
            .field(
                "username",
                &self.credentials.as_ref().map(|c| c.username.as_str()),
            )
            .finish()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionOptions {
    pub broker_url: String,
    pub keepalive: Duration,
    pub connect_timeout: Duration,
    pub reconnect_period: Duration,
    pub tls: TlsSettings,
    pub clean_session: bool,
    pub last_will: Option<LastWillDeclaration>,
}

impl ConnectionOptions {
    /// Whether the broker URL selects a TLS transport
    pub fn uses_tls(&self) -> bool {
        let scheme = self
            .broker_url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .unwrap_or_default();
        matches!(scheme.as_str(), "mqtts" | "ssl" | "tls")
    }
}

/// Configured trust inputs, resolved into a [`super::TrustPolicy`] per connect
#[derive(Debug, Clone, PartialEq)]
pub struct TlsSettings {
    pub ca_path: Option<PathBuf>,
    pub reject_unauthorized: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LastWillDeclaration {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: DeliveryQos,
    pub retain: bool,
}

/// One topic filter with its requested QoS
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub filter: String,
    pub qos: DeliveryQos,
}

impl Subscription {
    pub fn new(filter: impl Into<String>, qos: DeliveryQos) -> Self {
        Self {
            filter: filter.into(),
            qos,
        }
    }

    /// The single filter matching every topic
    pub fn catch_all(qos: DeliveryQos) -> Self {
        Self::new(crate::protocol::CATCH_ALL_FILTER, qos)
    }
}
