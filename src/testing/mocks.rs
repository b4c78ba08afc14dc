//! Mock implementations for testing
//!
//! [`MockConnector`] hands out [`MockEngine`]s and keeps the sending half of
//! each event channel, so tests can play the broker by injecting
//! [`EngineEvent`]s. [`RecordingSink`] captures everything the controller
//! observes.

use crate::observability::{MessageObservation, ObservationSink};
use crate::protocol::DeliveryQos;
use crate::session::{ConnectionState, SessionConfig};
use crate::transport::{
    ClientIdentity, ConnectParams, ConnectionOptions, EngineConnector, EngineError, EngineEvent,
    EngineFault, ProtocolEngine, Subscription, TlsSettings,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

const MOCK_EVENT_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Message captured by [`MockEngine::publish`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: DeliveryQos,
    pub retain: bool,
}

#[derive(Debug, Default)]
struct EngineRecord {
    subscribe_calls: Vec<Vec<Subscription>>,
    published: Vec<PublishedMessage>,
    end_calls: Vec<bool>,
    fail_subscribe: bool,
    fail_publish: bool,
}

/// Mock protocol engine recording every command
#[derive(Debug, Clone)]
pub struct MockEngine {
    record: Arc<Mutex<EngineRecord>>,
    events_tx: Option<mpsc::Sender<EngineEvent>>,
    ack_disconnect: bool,
}

impl MockEngine {
    /// Engine without an event channel
    pub fn new() -> Self {
        Self {
            record: Arc::new(Mutex::new(EngineRecord::default())),
            events_tx: None,
            ack_disconnect: true,
        }
    }

    fn with_events(events_tx: mpsc::Sender<EngineEvent>, ack_disconnect: bool) -> Self {
        Self {
            events_tx: Some(events_tx),
            ack_disconnect,
            ..Self::new()
        }
    }

    pub fn fail_subscribe(&self, fail: bool) {
        lock(&self.record).fail_subscribe = fail;
    }

    pub fn fail_publish(&self, fail: bool) {
        lock(&self.record).fail_publish = fail;
    }

    pub fn subscribe_calls(&self) -> Vec<Vec<Subscription>> {
        lock(&self.record).subscribe_calls.clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.record).published.clone()
    }

    /// `force` flag of every `end` call, in order
    pub fn end_calls(&self) -> Vec<bool> {
        lock(&self.record).end_calls.clone()
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolEngine for MockEngine {
    async fn subscribe(&self, subscriptions: &[Subscription]) -> Result<(), EngineError> {
        let mut record = lock(&self.record);
        record.subscribe_calls.push(subscriptions.to_vec());
        if record.fail_subscribe {
            return Err(EngineError::SubscribeFailed("mock subscribe failure".into()));
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: DeliveryQos,
        retain: bool,
    ) -> Result<(), EngineError> {
        let mut record = lock(&self.record);
        if record.fail_publish {
            return Err(EngineError::PublishFailed("mock publish failure".into()));
        }
        record.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    async fn end(&mut self, force: bool) -> Result<(), EngineError> {
        lock(&self.record).end_calls.push(force);
        if force || self.ack_disconnect {
            if let Some(tx) = &self.events_tx {
                let _ = tx.try_send(EngineEvent::Closed);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ConnectorRecord {
    connects: Vec<ConnectParams>,
    fail_next: Option<EngineError>,
    engines: Vec<MockEngine>,
    senders: Vec<mpsc::Sender<EngineEvent>>,
}

/// Mock connector; clones share state
#[derive(Debug, Clone)]
pub struct MockConnector {
    record: Arc<Mutex<ConnectorRecord>>,
    ack_disconnect: bool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            record: Arc::new(Mutex::new(ConnectorRecord::default())),
            ack_disconnect: true,
        }
    }

    /// Engines that never acknowledge a graceful end
    pub fn silent() -> Self {
        Self {
            ack_disconnect: false,
            ..Self::new()
        }
    }

    /// Make the next `connect` fail with `error`
    pub fn fail_connect(&self, error: EngineError) {
        lock(&self.record).fail_next = Some(error);
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.record).connects.len()
    }

    pub fn connect_params(&self) -> Vec<ConnectParams> {
        lock(&self.record).connects.clone()
    }

    /// Event sender for the most recent engine
    pub fn events(&self) -> Option<mpsc::Sender<EngineEvent>> {
        lock(&self.record).senders.last().cloned()
    }

    /// The most recent engine
    pub fn engine(&self) -> Option<MockEngine> {
        lock(&self.record).engines.last().cloned()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConnector for MockConnector {
    type Engine = MockEngine;

    fn connect(
        &self,
        params: &ConnectParams,
    ) -> Result<(MockEngine, mpsc::Receiver<EngineEvent>), EngineError> {
        let mut record = lock(&self.record);
        if let Some(error) = record.fail_next.take() {
            return Err(error);
        }

        let (tx, rx) = mpsc::channel(MOCK_EVENT_CAPACITY);
        let engine = MockEngine::with_events(tx.clone(), self.ack_disconnect);
        record.connects.push(params.clone());
        record.engines.push(engine.clone());
        record.senders.push(tx);
        Ok((engine, rx))
    }
}

/// Sink capturing every observation
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<MessageObservation>>,
    transitions: Mutex<Vec<(ConnectionState, ConnectionState)>>,
    sessions: Mutex<Vec<bool>>,
    faults: Mutex<Vec<EngineFault>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<MessageObservation> {
        lock(&self.messages).clone()
    }

    pub fn transitions(&self) -> Vec<(ConnectionState, ConnectionState)> {
        lock(&self.transitions).clone()
    }

    /// `session_present` of every CONNACK, in order
    pub fn sessions(&self) -> Vec<bool> {
        lock(&self.sessions).clone()
    }

    pub fn faults(&self) -> Vec<EngineFault> {
        lock(&self.faults).clone()
    }
}

impl ObservationSink for RecordingSink {
    fn record_message(&self, observation: &MessageObservation) {
        lock(&self.messages).push(observation.clone());
    }

    fn record_transition(&self, from: ConnectionState, to: ConnectionState) {
        lock(&self.transitions).push((from, to));
    }

    fn record_session(&self, session_present: bool) {
        lock(&self.sessions).push(session_present);
    }

    fn record_fault(&self, fault: &EngineFault) {
        lock(&self.faults).push(fault.clone());
    }
}

/// Session config for a plaintext local broker with short timeouts
pub fn test_session_config() -> SessionConfig {
    SessionConfig {
        identity: ClientIdentity {
            client_id: "mock-watcher".to_string(),
            credentials: None,
        },
        options: ConnectionOptions {
            broker_url: "mqtt://localhost:1883".to_string(),
            keepalive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(1),
            reconnect_period: Duration::from_millis(10),
            tls: TlsSettings {
                ca_path: None,
                reject_unauthorized: true,
            },
            clean_session: true,
            last_will: None,
        },
        subscriptions: vec![Subscription::catch_all(DeliveryQos::AtMostOnce)],
        diagnostic_topic: "topicwatch/mock-watcher/diagnostic".to_string(),
        diagnostic_qos: DeliveryQos::AtMostOnce,
        shutdown_timeout: Duration::from_millis(200),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TrustPolicy, TrustSource};

    fn params() -> ConnectParams {
        let config = test_session_config();
        ConnectParams {
            identity: config.identity,
            options: config.options,
            trust: TrustPolicy {
                ca_bundle: None,
                strict: true,
                source: TrustSource::NotConfigured,
            },
        }
    }

    #[tokio::test]
    async fn test_connector_records_and_fails_once() {
        let connector = MockConnector::new();
        connector.fail_connect(EngineError::Tls("no provider".to_string()));

        assert!(connector.connect(&params()).is_err());
        assert!(connector.connect(&params()).is_ok());
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_graceful_end_acknowledged() {
        let connector = MockConnector::new();
        let (mut engine, mut events) = connector.connect(&params()).unwrap();
        engine.end(false).await.unwrap();
        assert_eq!(events.recv().await, Some(EngineEvent::Closed));
        assert_eq!(engine.end_calls(), vec![false]);
    }

    #[tokio::test]
    async fn test_silent_engine_ignores_graceful_end() {
        let connector = MockConnector::silent();
        let (mut engine, mut events) = connector.connect(&params()).unwrap();
        engine.end(false).await.unwrap();
        assert!(events.try_recv().is_err());
    }
}
