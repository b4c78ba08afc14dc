//! MQTT v5 protocol engine built on rumqttc
//!
//! The module separates pure functions from I/O:
//!
//! - [`connection`] - broker URL parsing and rumqttc option assembly
//! - [`message_handler`] - event routing and transport fault classification
//! - [`tls`] - rustls configuration for unverified brokers
//! - [`client`] - the event pump and the engine handle
//!
//! # Usage
//!
//! ```rust,no_run
//! use topicwatch::config::WatchConfig;
//! use topicwatch::transport::mqtt::RumqttcConnector;
//! use topicwatch::transport::{load_trust_policy, ConnectParams, EngineConnector};
//!
//! # tokio_test::block_on(async {
//! let config = WatchConfig::default();
//! let identity = config.client_identity();
//! let options = config.connection_options(&identity);
//! let trust = load_trust_policy(&options.tls);
//! let params = ConnectParams { identity, options, trust };
//!
//! let (engine, mut events) = RumqttcConnector::new().connect(&params)?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # drop(engine);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;
pub mod tls;

pub use client::{RumqttcConnector, RumqttcEngine};
pub use connection::{parse_broker_url, BrokerAddress};
pub use message_handler::{classify_error, classify_fault_message, EventRoute};
