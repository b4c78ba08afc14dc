//! Pure translation from connection inputs to rumqttc options
//!
//! Nothing here touches the network; the functions only parse the broker
//! address and assemble the rumqttc configuration, so they are unit tested
//! directly.

use super::tls::insecure_client_config;
use crate::protocol::DeliveryQos;
use crate::transport::{ConnectParams, EngineError, LastWillDeclaration, TrustPolicy};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::{TlsConfiguration, Transport as RumqttcTransport};
use std::sync::Arc;
use url::Url;

/// Maximum incoming and outgoing packet size
pub const MAX_PACKET_SIZE: u32 = 1024 * 1024;

/// Host, port and transport security of a broker URL
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

/// Parse `mqtt://`, `tcp://`, `mqtts://`, `ssl://` or `tls://` URLs
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerAddress, EngineError> {
    let url =
        Url::parse(broker_url).map_err(|_| EngineError::InvalidBrokerUrl(broker_url.to_string()))?;

    let secure = match url.scheme() {
        "mqtts" | "ssl" | "tls" => true,
        "mqtt" | "tcp" => false,
        _ => return Err(EngineError::InvalidBrokerUrl(broker_url.to_string())),
    };

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| EngineError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if secure { 8883 } else { 1883 });

    Ok(BrokerAddress {
        host: host.to_string(),
        port,
        secure,
    })
}

/// Build rumqttc options for one connect attempt
pub fn configure_mqtt_options(params: &ConnectParams) -> Result<MqttOptions, EngineError> {
    let address = parse_broker_url(&params.options.broker_url)?;

    let mut mqtt_options = MqttOptions::new(
        params.identity.client_id.clone(),
        address.host.clone(),
        address.port,
    );

    if address.secure {
        mqtt_options.set_transport(build_tls_transport(&params.trust)?);
    }

    if let Some(credentials) = &params.identity.credentials {
        mqtt_options.set_credentials(credentials.username.clone(), credentials.secret.clone());
    }

    mqtt_options.set_keep_alive(params.options.keepalive);
    mqtt_options.set_clean_start(params.options.clean_session);
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    if let Some(will) = &params.options.last_will {
        mqtt_options.set_last_will(build_last_will(will));
    }

    Ok(mqtt_options)
}

/// Select the TLS transport for a resolved trust policy
pub fn build_tls_transport(trust: &TrustPolicy) -> Result<RumqttcTransport, EngineError> {
    match (&trust.ca_bundle, trust.strict) {
        (Some(ca), _) => Ok(RumqttcTransport::tls_with_config(
            TlsConfiguration::Simple {
                ca: ca.clone(),
                alpn: None,
                client_auth: None,
            },
        )),
        (None, true) => Ok(RumqttcTransport::tls_with_default_config()),
        (None, false) => {
            let config = insecure_client_config();
            Ok(RumqttcTransport::tls_with_config(TlsConfiguration::Rustls(
                Arc::new(config),
            )))
        }
    }
}

pub fn build_last_will(will: &LastWillDeclaration) -> LastWill {
    LastWill::new(
        will.topic.clone(),
        will.payload.clone(),
        to_rumqttc_qos(will.qos),
        will.retain,
        None,
    )
}

pub fn to_rumqttc_qos(qos: DeliveryQos) -> QoS {
    match qos {
        DeliveryQos::AtMostOnce => QoS::AtMostOnce,
        DeliveryQos::AtLeastOnce => QoS::AtLeastOnce,
        DeliveryQos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

pub fn from_rumqttc_qos(qos: QoS) -> DeliveryQos {
    match qos {
        QoS::AtMostOnce => DeliveryQos::AtMostOnce,
        QoS::AtLeastOnce => DeliveryQos::AtLeastOnce,
        QoS::ExactlyOnce => DeliveryQos::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{
        ClientIdentity, ConnectionOptions, Credentials, TlsSettings, TrustSource,
    };
    use std::time::Duration;

    fn test_params(broker_url: &str, trust: TrustPolicy) -> ConnectParams {
        ConnectParams {
            identity: ClientIdentity {
                client_id: "test-watcher".to_string(),
                credentials: Some(Credentials {
                    username: "user".to_string(),
                    secret: "pass".to_string(),
                }),
            },
            options: ConnectionOptions {
                broker_url: broker_url.to_string(),
                keepalive: Duration::from_secs(30),
                connect_timeout: Duration::from_secs(5),
                reconnect_period: Duration::from_millis(100),
                tls: TlsSettings {
                    ca_path: None,
                    reject_unauthorized: true,
                },
                clean_session: true,
                last_will: Some(LastWillDeclaration {
                    topic: "topicwatch/test-watcher/status".to_string(),
                    payload: b"offline".to_vec(),
                    qos: DeliveryQos::AtLeastOnce,
                    retain: true,
                }),
            },
            trust,
        }
    }

    fn strict_system_roots() -> TrustPolicy {
        TrustPolicy {
            ca_bundle: None,
            strict: true,
            source: TrustSource::NotConfigured,
        }
    }

    #[test]
    fn test_parse_broker_url_defaults_ports() {
        assert_eq!(
            parse_broker_url("mqtts://broker.example.com").unwrap(),
            BrokerAddress {
                host: "broker.example.com".to_string(),
                port: 8883,
                secure: true,
            }
        );
        assert_eq!(parse_broker_url("mqtt://localhost").unwrap().port, 1883);
        assert_eq!(parse_broker_url("tcp://localhost:1884").unwrap().port, 1884);
        assert!(parse_broker_url("ssl://10.0.0.5:8884").unwrap().secure);
    }

    #[test]
    fn test_parse_broker_url_rejects_malformed() {
        assert!(matches!(
            parse_broker_url("invalid-url"),
            Err(EngineError::InvalidBrokerUrl(_))
        ));
        assert!(matches!(
            parse_broker_url("http://broker:80"),
            Err(EngineError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn test_configure_plain_options() {
        let params = test_params("mqtt://localhost:1883", strict_system_roots());
        let options = configure_mqtt_options(&params).unwrap();
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.client_id(), "test-watcher");
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(options.last_will().is_some());
    }

    #[test]
    fn test_configure_tls_options_for_every_trust_shape() {
        let with_bundle = TrustPolicy {
            ca_bundle: Some(b"-----BEGIN CERTIFICATE-----".to_vec()),
            strict: true,
            source: TrustSource::Bundle,
        };
        let lenient = TrustPolicy {
            ca_bundle: None,
            strict: false,
            source: TrustSource::NotConfigured,
        };

        for trust in [with_bundle, strict_system_roots(), lenient] {
            let params = test_params("mqtts://broker:8883", trust);
            assert!(configure_mqtt_options(&params).is_ok());
        }
    }

    #[test]
    fn test_invalid_broker_url_is_construction_error() {
        let params = test_params("not a url", strict_system_roots());
        let err = configure_mqtt_options(&params).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_qos_mapping_round_trips() {
        for qos in [
            DeliveryQos::AtMostOnce,
            DeliveryQos::AtLeastOnce,
            DeliveryQos::ExactlyOnce,
        ] {
            assert_eq!(from_rumqttc_qos(to_rumqttc_qos(qos)), qos);
        }
    }
}
