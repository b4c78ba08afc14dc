//! topicwatch - a long-running MQTT observer
//!
//! Keeps one TLS session open to a broker, subscribes to the whole topic
//! namespace (or a configured filter set) and classifies every inbound
//! payload as a structured record or plain text.
//!
//! # Overview
//!
//! - [`transport`] - the protocol engine seam and its rumqttc implementation
//! - [`session`] - connection state machine, subscription issue and the
//!   controller event loop
//! - [`analysis`] - payload classification and content analysis
//! - [`observability`] - logging setup, the observation sink and the HTTP
//!   status endpoint
//! - [`config`] - TOML configuration with command-line overrides
//!
//! # Quick Start
//!
//! ```rust
//! use topicwatch::analysis::{analyze, classify_payload, ClassifiedContent};
//!
//! let content = classify_payload(br#"{"temperature": 21.5, "device_id": "s-1"}"#);
//! assert!(matches!(content, ClassifiedContent::StructuredRecord { .. }));
//!
//! let report = serde_json::to_string(&analyze(&content)).unwrap();
//! assert!(report.contains("temperature"));
//! ```

pub mod analysis;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::WatchConfig;
pub use error::{WatchError, WatchResult};
pub use session::{SessionController, SessionHandle, StatsSnapshot};
