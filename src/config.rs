//! Configuration system for topicwatch
//!
//! Configuration is read from a TOML file. Every section is optional and falls
//! back to defaults that connect to a local TLS broker and watch every topic.
//! Credentials are never stored in the file directly unless given inline; the
//! usual form names environment variables that hold them.

use crate::protocol::{validate_client_id, validate_topic_filter, DeliveryQos, CATCH_ALL_FILTER};
use crate::transport::{
    ClientIdentity, ConnectionOptions, Credentials, LastWillDeclaration, Subscription,
    TlsSettings,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// URL schemes the broker address may use
pub const SUPPORTED_SCHEMES: &[&str] = &["mqtt", "tcp", "mqtts", "ssl", "tls"];

/// Searched in order when no config file is given
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["topicwatch.toml", "config/topicwatch.toml"];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WatchConfig {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub subscription: SubscriptionSection,
    #[serde(default)]
    pub diagnostic: DiagnosticSection,
    #[serde(default)]
    pub status: StatusSection,
}

/// Client identity section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientSection {
    /// Fixed client identifier; generated per process when absent
    pub id: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Inline username, used when no `username_env` is set
    pub username: Option<String>,
    /// Inline password, used when no `password_env` is set
    pub password: Option<String>,
}

/// Broker connection section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL with scheme and port, e.g. `mqtts://broker.example.com:8883`
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Delay between reconnection attempts made by the protocol engine
    #[serde(default = "default_reconnect_period")]
    pub reconnect_period_ms: u64,
    /// How long a graceful shutdown waits for the broker to acknowledge
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub clean_session: bool,
    #[serde(default)]
    pub tls: TlsSection,
    #[serde(default)]
    pub last_will: LastWillSection,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            keepalive_secs: default_keepalive(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect_period_ms: default_reconnect_period(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            clean_session: true,
            tls: TlsSection::default(),
            last_will: LastWillSection::default(),
        }
    }
}

/// TLS trust section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsSection {
    /// PEM bundle of trusted CA certificates
    #[serde(default = "default_ca_path")]
    pub ca_path: Option<PathBuf>,
    /// Verify the broker certificate when no CA bundle could be loaded.
    /// A loaded bundle always forces verification on.
    #[serde(default = "default_true")]
    pub reject_unauthorized: bool,
}

impl Default for TlsSection {
    fn default() -> Self {
        Self {
            ca_path: default_ca_path(),
            reject_unauthorized: true,
        }
    }
}

/// Last will registration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastWillSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Defaults to `topicwatch/<client_id>/status`
    pub topic: Option<String>,
    /// Defaults to an offline status record
    pub payload: Option<String>,
    #[serde(default = "default_will_qos")]
    pub qos: DeliveryQos,
    #[serde(default = "default_true")]
    pub retain: bool,
}

impl Default for LastWillSection {
    fn default() -> Self {
        Self {
            enabled: true,
            topic: None,
            payload: None,
            qos: default_will_qos(),
            retain: true,
        }
    }
}

/// Subscription set issued after every handshake
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionSection {
    #[serde(default = "default_filters")]
    pub filters: Vec<String>,
    #[serde(default)]
    pub qos: DeliveryQos,
}

impl Default for SubscriptionSection {
    fn default() -> Self {
        Self {
            filters: default_filters(),
            qos: DeliveryQos::AtMostOnce,
        }
    }
}

/// Diagnostic publish settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DiagnosticSection {
    /// Defaults to `topicwatch/<client_id>/diagnostic`
    pub topic: Option<String>,
    #[serde(default)]
    pub qos: DeliveryQos,
    /// Publish one diagnostic message this many seconds after startup
    pub delay_secs: Option<u64>,
}

/// HTTP status endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StatusSection {
    pub port: Option<u16>,
}

fn default_broker_url() -> String {
    "mqtts://localhost:8883".to_string()
}

fn default_keepalive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_reconnect_period() -> u64 {
    1000
}

fn default_shutdown_timeout() -> u64 {
    2000
}

fn default_ca_path() -> Option<PathBuf> {
    Some(PathBuf::from("certs/ca.pem"))
}

fn default_will_qos() -> DeliveryQos {
    DeliveryQos::AtLeastOnce
}

fn default_filters() -> Vec<String> {
    vec![CATCH_ALL_FILTER.to_string()]
}

fn default_true() -> bool {
    true
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid topic filter: {0}")]
    InvalidFilter(String),
    #[error("Invalid client ID: {0}")]
    InvalidClientId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl WatchConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: WatchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the fields that would otherwise fail at engine construction
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_broker_url(&self.mqtt.broker_url)?;

        if self.subscription.filters.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "subscription.filters must contain at least one filter".to_string(),
            ));
        }
        for filter in &self.subscription.filters {
            validate_topic_filter(filter)
                .map_err(|e| ConfigError::InvalidFilter(e.to_string()))?;
        }

        if let Some(id) = &self.client.id {
            validate_client_id(id).map_err(|e| ConfigError::InvalidClientId(e.to_string()))?;
        }

        if self.mqtt.keepalive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.keepalive_secs must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// MQTT username from the named environment variable, or the inline value
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.client.username_env.as_ref())
            .or_else(|| self.client.username.clone())
    }

    /// MQTT password from the named environment variable, or the inline value
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.client.password_env.as_ref())
            .or_else(|| self.client.password.clone())
    }

    /// Build the process-lifetime client identity
    pub fn client_identity(&self) -> ClientIdentity {
        let client_id = self
            .client
            .id
            .clone()
            .unwrap_or_else(generate_client_id);

        let credentials = self.get_mqtt_username().map(|username| Credentials {
            username,
            secret: self.get_mqtt_password().unwrap_or_default(),
        });

        ClientIdentity {
            client_id,
            credentials,
        }
    }

    /// Build immutable connection options for the given identity
    pub fn connection_options(&self, identity: &ClientIdentity) -> ConnectionOptions {
        let last_will = self.mqtt.last_will.enabled.then(|| {
            let topic = self
                .mqtt
                .last_will
                .topic
                .clone()
                .unwrap_or_else(|| format!("topicwatch/{}/status", identity.client_id));
            let payload = match &self.mqtt.last_will.payload {
                Some(payload) => payload.clone().into_bytes(),
                None => serde_json::to_vec(&crate::protocol::StatusReport::offline(
                    &identity.client_id,
                ))
                .unwrap_or_default(),
            };
            LastWillDeclaration {
                topic,
                payload,
                qos: self.mqtt.last_will.qos,
                retain: self.mqtt.last_will.retain,
            }
        });

        ConnectionOptions {
            broker_url: self.mqtt.broker_url.clone(),
            keepalive: Duration::from_secs(self.mqtt.keepalive_secs),
            connect_timeout: Duration::from_secs(self.mqtt.connect_timeout_secs),
            reconnect_period: Duration::from_millis(self.mqtt.reconnect_period_ms),
            tls: TlsSettings {
                ca_path: self.mqtt.tls.ca_path.clone(),
                reject_unauthorized: self.mqtt.tls.reject_unauthorized,
            },
            clean_session: self.mqtt.clean_session,
            last_will,
        }
    }

    /// Configured subscription set
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscription
            .filters
            .iter()
            .map(|filter| Subscription::new(filter.clone(), self.subscription.qos))
            .collect()
    }

    /// Diagnostic topic for the given client
    pub fn diagnostic_topic(&self, client_id: &str) -> String {
        self.diagnostic
            .topic
            .clone()
            .unwrap_or_else(|| format!("topicwatch/{client_id}/diagnostic"))
    }

    /// Shutdown acknowledgment bound
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.mqtt.shutdown_timeout_ms)
    }
}

/// Command-line values layered over the file configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub broker_url: Option<String>,
    pub ca_file: Option<PathBuf>,
    pub topics: Vec<String>,
    pub insecure: bool,
    pub status_port: Option<u16>,
}

impl ConfigOverrides {
    /// Apply the overrides and re-validate the result
    pub fn apply(&self, mut config: WatchConfig) -> Result<WatchConfig, ConfigError> {
        if let Some(url) = &self.broker_url {
            config.mqtt.broker_url = url.clone();
        }
        if let Some(path) = &self.ca_file {
            config.mqtt.tls.ca_path = Some(path.clone());
        }
        if !self.topics.is_empty() {
            config.subscription.filters = self.topics.clone();
        }
        if self.insecure {
            config.mqtt.tls.reject_unauthorized = false;
        }
        if let Some(port) = self.status_port {
            config.status.port = Some(port);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Load from `path` when given, else the first default location that
/// exists, else built-in defaults. Returns the file actually read.
pub fn discover_config(
    path: Option<&Path>,
) -> Result<(WatchConfig, Option<PathBuf>), ConfigError> {
    if let Some(path) = path {
        return Ok((WatchConfig::load_from_file(path)?, Some(path.to_path_buf())));
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        let candidate = PathBuf::from(candidate);
        if candidate.exists() {
            let config = WatchConfig::load_from_file(&candidate)?;
            return Ok((config, Some(candidate)));
        }
    }

    Ok((WatchConfig::default(), None))
}

/// Generate a unique client identifier for this process
pub fn generate_client_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("topicwatch-{}", &uuid[..8])
}

/// Check that a broker URL parses, has a host, and uses a supported scheme
pub fn validate_broker_url(broker_url: &str) -> Result<(), ConfigError> {
    let url =
        Url::parse(broker_url).map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(ConfigError::InvalidBrokerUrl(format!(
            "{broker_url} (unsupported scheme '{}')",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = WatchConfig::from_toml_str("").unwrap();
        assert_eq!(config.mqtt.broker_url, "mqtts://localhost:8883");
        assert_eq!(config.mqtt.keepalive_secs, 60);
        assert!(config.mqtt.clean_session);
        assert!(config.mqtt.tls.reject_unauthorized);
        assert_eq!(config.mqtt.tls.ca_path, Some(PathBuf::from("certs/ca.pem")));
        assert_eq!(config.subscription.filters, vec!["#"]);
        assert_eq!(config.subscription.qos, DeliveryQos::AtMostOnce);
        assert_eq!(config.mqtt.last_will.qos, DeliveryQos::AtLeastOnce);
        assert_eq!(config.status.port, None);
    }

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[client]
id = "watcher-1"
username_env = "TW_TEST_USER"
password_env = "TW_TEST_PASS"

[mqtt]
broker_url = "mqtts://broker.example.com:8883"
keepalive_secs = 30
connect_timeout_secs = 10
reconnect_period_ms = 500
clean_session = true

[mqtt.tls]
ca_path = "/etc/topicwatch/ca.pem"
reject_unauthorized = false

[mqtt.last_will]
topic = "clients/watcher-1/state"
payload = "gone"
qos = 2
retain = false

[subscription]
filters = ["sensors/+/temperature", "alerts/#"]
qos = 1

[diagnostic]
topic = "diag/watcher-1"
delay_secs = 5

[status]
port = 9090
"#;

        let config = WatchConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.client.id.as_deref(), Some("watcher-1"));
        assert_eq!(config.mqtt.keepalive_secs, 30);
        assert!(!config.mqtt.tls.reject_unauthorized);
        assert_eq!(config.mqtt.last_will.qos, DeliveryQos::ExactlyOnce);
        assert_eq!(config.subscription.filters.len(), 2);
        assert_eq!(config.diagnostic.delay_secs, Some(5));
        assert_eq!(config.status.port, Some(9090));

        let subs = config.subscriptions();
        assert_eq!(subs[0].filter, "sensors/+/temperature");
        assert_eq!(subs[1].qos, DeliveryQos::AtLeastOnce);
    }

    #[test]
    fn test_invalid_broker_url_rejected() {
        let result = WatchConfig::from_toml_str("[mqtt]\nbroker_url = \"not a url\"");
        assert!(matches!(result, Err(ConfigError::InvalidBrokerUrl(_))));

        let result = WatchConfig::from_toml_str("[mqtt]\nbroker_url = \"http://broker:80\"");
        assert!(matches!(result, Err(ConfigError::InvalidBrokerUrl(_))));
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let result = WatchConfig::from_toml_str("[subscription]\nfilters = [\"a/#/b\"]");
        assert!(matches!(result, Err(ConfigError::InvalidFilter(_))));

        let result = WatchConfig::from_toml_str("[subscription]\nfilters = []");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_client_id_rejected() {
        let result = WatchConfig::from_toml_str("[client]\nid = \"bad id\"");
        assert!(matches!(result, Err(ConfigError::InvalidClientId(_))));
    }

    #[test]
    fn test_generated_client_id_format() {
        let id = generate_client_id();
        assert!(id.starts_with("topicwatch-"));
        assert_eq!(id.len(), "topicwatch-".len() + 8);
        assert!(validate_client_id(&id).is_ok());
        assert_ne!(id, generate_client_id());
    }

    #[test]
    fn test_identity_uses_configured_id_and_inline_credentials() {
        let mut config = WatchConfig::default();
        config.client.id = Some("fixed-id".to_string());
        config.client.username = Some("alice".to_string());
        config.client.password = Some("s3cret".to_string());

        let identity = config.client_identity();
        assert_eq!(identity.client_id, "fixed-id");
        let credentials = identity.credentials.expect("credentials should be set");
        assert_eq!(credentials.username, "alice");
        assert_eq!(credentials.secret, "s3cret");
    }

    #[test]
    fn test_identity_prefers_env_credentials() {
        std::env::set_var("TW_CONFIG_TEST_USER", "env-user");
        let mut config = WatchConfig::default();
        config.client.username_env = Some("TW_CONFIG_TEST_USER".to_string());
        config.client.username = Some("inline-user".to_string());

        let identity = config.client_identity();
        let credentials = identity.credentials.unwrap();
        assert_eq!(credentials.username, "env-user");
        assert_eq!(credentials.secret, "");

        std::env::remove_var("TW_CONFIG_TEST_USER");
    }

    #[test]
    fn test_connection_options_last_will_defaults() {
        let config = WatchConfig::default();
        let identity = ClientIdentity {
            client_id: "watcher-9".to_string(),
            credentials: None,
        };
        let options = config.connection_options(&identity);

        let will = options.last_will.expect("last will enabled by default");
        assert_eq!(will.topic, "topicwatch/watcher-9/status");
        assert!(will.retain);
        let payload: serde_json::Value = serde_json::from_slice(&will.payload).unwrap();
        assert_eq!(payload["status"], "offline");
        assert_eq!(options.keepalive, Duration::from_secs(60));
        assert_eq!(options.reconnect_period, Duration::from_millis(1000));
    }

    #[test]
    fn test_last_will_can_be_disabled() {
        let config = WatchConfig::from_toml_str("[mqtt.last_will]\nenabled = false").unwrap();
        let identity = config.client_identity();
        assert!(config.connection_options(&identity).last_will.is_none());
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let overrides = ConfigOverrides {
            broker_url: Some("mqtt://10.0.0.5:1884".to_string()),
            ca_file: Some(PathBuf::from("/tmp/other-ca.pem")),
            topics: vec!["plant/#".to_string(), "alerts/+".to_string()],
            insecure: true,
            status_port: Some(8081),
        };

        let config = overrides.apply(WatchConfig::default()).unwrap();
        assert_eq!(config.mqtt.broker_url, "mqtt://10.0.0.5:1884");
        assert_eq!(config.mqtt.tls.ca_path, Some(PathBuf::from("/tmp/other-ca.pem")));
        assert_eq!(config.subscription.filters, vec!["plant/#", "alerts/+"]);
        assert!(!config.mqtt.tls.reject_unauthorized);
        assert_eq!(config.status.port, Some(8081));
    }

    #[test]
    fn test_empty_overrides_keep_config() {
        let config = ConfigOverrides::default()
            .apply(WatchConfig::default())
            .unwrap();
        assert_eq!(config, WatchConfig::default());
    }

    #[test]
    fn test_overrides_are_validated() {
        let overrides = ConfigOverrides {
            topics: vec!["bad/#/filter".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            overrides.apply(WatchConfig::default()),
            Err(ConfigError::InvalidFilter(_))
        ));

        let overrides = ConfigOverrides {
            broker_url: Some("ftp://broker".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            overrides.apply(WatchConfig::default()),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn test_discover_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watch.toml");
        std::fs::write(&path, "[subscription]\nfilters = [\"a/b\"]\n").unwrap();

        let (config, used) = discover_config(Some(&path)).unwrap();
        assert_eq!(used.as_deref(), Some(path.as_path()));
        assert_eq!(config.subscription.filters, vec!["a/b"]);
    }

    #[test]
    fn test_discover_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = discover_config(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::FileRead(_))));
    }

    #[test]
    fn test_diagnostic_topic_default() {
        let config = WatchConfig::default();
        assert_eq!(config.diagnostic_topic("w1"), "topicwatch/w1/diagnostic");
    }
}
