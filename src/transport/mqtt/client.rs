//! rumqttc-backed protocol engine
//!
//! [`RumqttcConnector::connect`] builds an `AsyncClient`/`EventLoop` pair and
//! spawns an event pump that polls the loop, routes every event through
//! [`route_mqtt_event`] and forwards the result on one ordered channel. The
//! event loop reconnects by itself when polled again after an error; the pump
//! only spaces those attempts by the reconnect period.

use super::connection::{configure_mqtt_options, to_rumqttc_qos};
use super::message_handler::{classify_error, resolve_grants, route_mqtt_event, EventRoute};
use crate::protocol::DeliveryQos;
use crate::transport::{
    ConnectParams, EngineConnector, EngineError, EngineEvent, EngineFault, FaultKind,
    ProtocolEngine, Subscription,
};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::Filter;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const DEFAULT_REQUEST_CAPACITY: usize = 10;
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Builds [`RumqttcEngine`] handles
#[derive(Debug, Clone)]
pub struct RumqttcConnector {
    request_capacity: usize,
    event_capacity: usize,
}

impl RumqttcConnector {
    pub fn new() -> Self {
        Self {
            request_capacity: DEFAULT_REQUEST_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Default for RumqttcConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConnector for RumqttcConnector {
    type Engine = RumqttcEngine;

    fn connect(
        &self,
        params: &ConnectParams,
    ) -> Result<(RumqttcEngine, mpsc::Receiver<EngineEvent>), EngineError> {
        let mqtt_options = configure_mqtt_options(params)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, self.request_capacity);

        let (events_tx, events_rx) = mpsc::channel(self.event_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let requested = Arc::new(Mutex::new(Vec::new()));

        let pump = EventPump {
            event_loop,
            events_tx: events_tx.clone(),
            shutdown_rx,
            requested: requested.clone(),
            connect_timeout: params.options.connect_timeout,
            reconnect_period: params.options.reconnect_period,
            online: false,
        };

        info!(
            broker_url = %params.options.broker_url,
            client_id = %params.identity.client_id,
            "Starting MQTT event pump"
        );
        let pump_handle = tokio::spawn(pump.run());

        Ok((
            RumqttcEngine {
                client,
                requested,
                shutdown_tx,
                events_tx,
                pump_handle: Some(pump_handle),
            },
            events_rx,
        ))
    }
}

/// Live handle to one rumqttc session
///
/// Commands use the non-blocking `try_*` client calls so a caller that is also
/// the consumer of the event channel can never deadlock against the pump.
pub struct RumqttcEngine {
    client: AsyncClient,
    requested: Arc<Mutex<Vec<Subscription>>>,
    shutdown_tx: watch::Sender<bool>,
    events_tx: mpsc::Sender<EngineEvent>,
    pump_handle: Option<JoinHandle<()>>,
}

#[async_trait]
impl ProtocolEngine for RumqttcEngine {
    async fn subscribe(&self, subscriptions: &[Subscription]) -> Result<(), EngineError> {
        if subscriptions.is_empty() {
            return Ok(());
        }
        if self.pump_handle.is_none() {
            return Err(EngineError::Closed);
        }

        if let Ok(mut requested) = self.requested.lock() {
            *requested = subscriptions.to_vec();
        }

        let filters = subscriptions
            .iter()
            .map(|s| Filter::new(s.filter.clone(), to_rumqttc_qos(s.qos)));
        self.client
            .try_subscribe_many(filters)
            .map_err(|e| EngineError::SubscribeFailed(Box::new(e)))
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: DeliveryQos,
        retain: bool,
    ) -> Result<(), EngineError> {
        if self.pump_handle.is_none() {
            return Err(EngineError::Closed);
        }
        self.client
            .try_publish(topic.to_string(), to_rumqttc_qos(qos), retain, payload)
            .map_err(|e| EngineError::PublishFailed(Box::new(e)))
    }

    async fn end(&mut self, force: bool) -> Result<(), EngineError> {
        let _ = self.shutdown_tx.send(true);

        if force {
            if let Some(handle) = self.pump_handle.take() {
                handle.abort();
                // The pump can no longer report; announce the close ourselves
                let _ = self.events_tx.try_send(EngineEvent::Closed);
            }
            return Ok(());
        }

        if self.pump_handle.is_none() {
            return Ok(());
        }
        self.client
            .try_disconnect()
            .map_err(|e| EngineError::DisconnectFailed(Box::new(e)))
    }
}

impl Drop for RumqttcEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.pump_handle.take() {
            handle.abort();
        }
    }
}

struct EventPump {
    event_loop: EventLoop,
    events_tx: mpsc::Sender<EngineEvent>,
    shutdown_rx: watch::Receiver<bool>,
    requested: Arc<Mutex<Vec<Subscription>>>,
    connect_timeout: Duration,
    reconnect_period: Duration,
    online: bool,
}

impl EventPump {
    async fn run(mut self) {
        loop {
            // Only the handshake is bounded; once online the keepalive detects dead peers
            let polled = if self.online {
                Ok(self.event_loop.poll().await)
            } else {
                tokio::time::timeout(self.connect_timeout, self.event_loop.poll()).await
            };

            let keep_running = match polled {
                Ok(Ok(event)) => self.handle_route(route_mqtt_event(&event)).await,
                Ok(Err(e)) => self.handle_fault(classify_error(&e)).await,
                Err(_) => {
                    let fault = EngineFault::new(
                        FaultKind::Timeout,
                        format!(
                            "no CONNACK within {}s",
                            self.connect_timeout.as_secs_f64()
                        ),
                    );
                    self.handle_fault(fault).await
                }
            };

            if !keep_running {
                break;
            }
        }
        debug!(target: "mqtt_transport", "MQTT event pump stopped");
    }

    /// Returns false once the pump should stop
    async fn handle_route(&mut self, route: EventRoute) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged { session_present } => {
                self.online = true;
                self.emit(EngineEvent::Connected { session_present }).await
            }
            EventRoute::MessageReceived(message) => self.emit(EngineEvent::Message(message)).await,
            EventRoute::SubscriptionAcknowledged { outcomes } => {
                let requested = self
                    .requested
                    .lock()
                    .map(|r| r.clone())
                    .unwrap_or_default();
                let grants = resolve_grants(&requested, outcomes);
                self.emit(EngineEvent::SubscriptionGranted { grants }).await
            }
            EventRoute::Disconnected { reason } => {
                self.online = false;
                self.emit(EngineEvent::Disconnected { reason }).await
            }
            EventRoute::DisconnectSent => {
                self.online = false;
                let _ = self.emit(EngineEvent::Closed).await;
                false
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    async fn handle_fault(&mut self, fault: EngineFault) -> bool {
        if *self.shutdown_rx.borrow() {
            let _ = self.emit(EngineEvent::Closed).await;
            return false;
        }

        if !self.emit(EngineEvent::Error(fault)).await {
            return false;
        }
        if self.online {
            self.online = false;
            if !self.emit(EngineEvent::Offline).await {
                return false;
            }
        }

        if !interruptible_sleep(self.shutdown_rx.clone(), self.reconnect_period).await {
            let _ = self.emit(EngineEvent::Closed).await;
            return false;
        }
        self.emit(EngineEvent::Reconnecting).await
    }

    /// Returns false when the consumer has gone away
    ///
    /// `&mut self` keeps the pump future `Send`; `EventLoop` is not `Sync`.
    async fn emit(&mut self, event: EngineEvent) -> bool {
        self.events_tx.send(event).await.is_ok()
    }
}

/// Sleep unless shutdown is requested first; true when the full period elapsed
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, period: Duration) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    tokio::select! {
        changed = shutdown_rx.changed() => {
            match changed {
                Ok(()) => !*shutdown_rx.borrow(),
                Err(_) => false,
            }
        }
        _ = tokio::time::sleep(period) => true,
    }
}
