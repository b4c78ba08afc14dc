//! Session controller: the single owner of connection state and run stats
//!
//! One task runs [`SessionController::run`], a `select!` loop over the
//! engine's event channel and the command channel fed by [`SessionHandle`]s.
//! State and stats are only mutated on that path; readers get snapshots.

use super::state::{
    can_publish, entered_connected, log_state_transition, next_state, start_transition,
    ConnectionState,
};
use super::stats::{RunStats, StatsSnapshot};
use super::subscriber::TopicSubscriber;
use crate::analysis::{analyze, classify_payload};
use crate::config::WatchConfig;
use crate::message_span;
use crate::observability::{MessageObservation, ObservationSink};
use crate::protocol::{DeliveryQos, InboundMessage, StatusReport};
use crate::session_span;
use crate::transport::{
    load_trust_policy, ClientIdentity, ConnectParams, ConnectionOptions, EngineConnector,
    EngineError, EngineEvent, EngineFault, ProtocolEngine, Subscription, TrustPolicy,
    TrustSource,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

const COMMAND_CAPACITY: usize = 32;

/// Controller inputs derived once from configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub identity: ClientIdentity,
    pub options: ConnectionOptions,
    pub subscriptions: Vec<Subscription>,
    pub diagnostic_topic: String,
    pub diagnostic_qos: DeliveryQos,
    pub shutdown_timeout: Duration,
}

impl SessionConfig {
    pub fn from_watch_config(config: &WatchConfig) -> Self {
        let identity = config.client_identity();
        let options = config.connection_options(&identity);
        Self {
            diagnostic_topic: config.diagnostic_topic(&identity.client_id),
            diagnostic_qos: config.diagnostic.qos,
            subscriptions: config.subscriptions(),
            shutdown_timeout: config.shutdown_timeout(),
            identity,
            options,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Engine construction failed: {0}")]
    Engine(#[from] EngineError),
    #[error("Session already started (state: {0})")]
    AlreadyStarted(ConnectionState),
    #[error("Session is closed")]
    Closed,
}

impl SessionError {
    /// Whether the process should give up
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::Engine(e) => e.is_fatal(),
            SessionError::AlreadyStarted(_) | SessionError::Closed => false,
        }
    }
}

/// Result of a diagnostic publish request
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticOutcome {
    Published { topic: String },
    /// Nothing was sent
    NotConnected { state: ConnectionState },
    Failed(String),
}

/// Commands accepted by the controller loop
#[derive(Debug)]
pub enum SessionCommand {
    PublishDiagnostic {
        topic: Option<String>,
        payload: Option<Vec<u8>>,
        reply: oneshot::Sender<DiagnosticOutcome>,
    },
    Disconnect {
        reply: oneshot::Sender<StatsSnapshot>,
    },
    Reconnect {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
}

/// Cloneable handle for talking to a running controller
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    stats_rx: watch::Receiver<StatsSnapshot>,
}

impl SessionHandle {
    /// Latest stats snapshot
    pub fn stats(&self) -> StatsSnapshot {
        self.stats_rx.borrow().clone()
    }

    /// Receiver that sees every published snapshot
    pub fn watch_stats(&self) -> watch::Receiver<StatsSnapshot> {
        self.stats_rx.clone()
    }

    /// Publish a diagnostic message; `None` selects the configured default
    pub async fn publish_diagnostic(
        &self,
        topic: Option<String>,
        payload: Option<Vec<u8>>,
    ) -> DiagnosticOutcome {
        let (reply, response) = oneshot::channel();
        let command = SessionCommand::PublishDiagnostic {
            topic,
            payload,
            reply,
        };
        if self.commands.send(command).await.is_err() {
            return DiagnosticOutcome::NotConnected {
                state: ConnectionState::Closed,
            };
        }
        response.await.unwrap_or(DiagnosticOutcome::NotConnected {
            state: ConnectionState::Closed,
        })
    }

    /// Close the session and return the final stats
    pub async fn disconnect(&self) -> StatsSnapshot {
        let (reply, response) = oneshot::channel();
        if self
            .commands
            .send(SessionCommand::Disconnect { reply })
            .await
            .is_err()
        {
            return self.stats();
        }
        response.await.unwrap_or_else(|_| self.stats())
    }

    /// Reconnect after the broker closed the session
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand::Reconnect { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)?
    }
}

struct Closing {
    deadline: Instant,
    replies: Vec<oneshot::Sender<StatsSnapshot>>,
}

pub struct SessionController<C: EngineConnector> {
    connector: C,
    config: SessionConfig,
    state: ConnectionState,
    stats: RunStats,
    engine: Option<C::Engine>,
    events: Option<mpsc::Receiver<EngineEvent>>,
    subscriber: TopicSubscriber,
    sink: Arc<dyn ObservationSink>,
    stats_tx: watch::Sender<StatsSnapshot>,
    commands_rx: mpsc::Receiver<SessionCommand>,
    commands_open: bool,
    closing: Option<Closing>,
}

impl<C: EngineConnector> SessionController<C> {
    pub fn new(
        connector: C,
        config: SessionConfig,
        sink: Arc<dyn ObservationSink>,
    ) -> (Self, SessionHandle) {
        let stats = RunStats::new(
            config.identity.client_id.clone(),
            config.options.broker_url.clone(),
        );
        let (stats_tx, stats_rx) = watch::channel(stats.snapshot());
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);

        let controller = Self {
            connector,
            subscriber: TopicSubscriber::new(config.subscriptions.clone()),
            config,
            state: ConnectionState::Disconnected,
            stats,
            engine: None,
            events: None,
            sink,
            stats_tx,
            commands_rx,
            commands_open: true,
            closing: None,
        };
        let handle = SessionHandle {
            commands: commands_tx,
            stats_rx,
        };
        (controller, handle)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn subscribe_requests_issued(&self) -> u64 {
        self.subscriber.requests_issued()
    }

    /// Build the engine and begin connecting
    ///
    /// Construction errors are returned before any event is consumed and
    /// leave the controller in `Disconnected`.
    pub fn start(&mut self) -> Result<(), SessionError> {
        let next = start_transition(self.state).ok_or(SessionError::AlreadyStarted(self.state))?;
        self.open_engine()?;
        self.transition(next);
        Ok(())
    }

    /// Process events and commands until the session is closed
    pub async fn run(mut self) -> StatsSnapshot {
        let span = session_span!(
            client_id = %self.config.identity.client_id,
            broker_url = %self.config.options.broker_url
        );

        async {
            while !self.state.is_closed() {
                let deadline = self.closing.as_ref().map(|c| c.deadline);
                tokio::select! {
                    event = next_event(&mut self.events) => match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            warn!("Engine event stream ended unexpectedly");
                            self.events = None;
                            self.apply(&EngineEvent::Closed).await;
                        }
                    },
                    command = self.commands_rx.recv(), if self.commands_open => match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            debug!("All session handles dropped");
                            self.commands_open = false;
                        }
                    },
                    _ = wait_for_deadline(deadline) => self.force_close().await,
                }
            }

            let snapshot = self.stats.snapshot();
            if let Some(closing) = self.closing.take() {
                for reply in closing.replies {
                    let _ = reply.send(snapshot.clone());
                }
            }
            snapshot
        }
        .instrument(span)
        .await
    }

    fn open_engine(&mut self) -> Result<(), EngineError> {
        let trust = if self.config.options.uses_tls() {
            load_trust_policy(&self.config.options.tls)
        } else {
            warn!(
                broker_url = %self.config.options.broker_url,
                "Plaintext broker URL; traffic is not encrypted"
            );
            TrustPolicy {
                ca_bundle: None,
                strict: self.config.options.tls.reject_unauthorized,
                source: TrustSource::NotConfigured,
            }
        };

        let params = ConnectParams {
            identity: self.config.identity.clone(),
            options: self.config.options.clone(),
            trust,
        };
        let (engine, events) = self.connector.connect(&params)?;
        self.engine = Some(engine);
        self.events = Some(events);
        Ok(())
    }

    async fn handle_event(&mut self, event: EngineEvent) {
        match &event {
            EngineEvent::Message(message) => self.on_message(message),
            // A repeated CONNACK on an open connection is not a new session
            EngineEvent::Connected { .. } if self.state.is_connected() => {
                debug!("CONNACK while already connected; not counted");
            }
            EngineEvent::Connected { session_present } => {
                self.stats.record_session();
                self.sink.record_session(*session_present);
                if *session_present {
                    info!("Session resumed");
                } else {
                    info!("New session");
                }
            }
            EngineEvent::SubscriptionGranted { grants } => self.subscriber.on_granted(grants),
            EngineEvent::Error(fault) => self.on_fault(fault),
            EngineEvent::Disconnected { reason } => {
                info!(reason = reason.as_deref().unwrap_or("unspecified"), "Broker sent DISCONNECT");
            }
            EngineEvent::Offline | EngineEvent::Reconnecting | EngineEvent::Closed => {}
        }
        self.apply(&event).await;
    }

    async fn apply(&mut self, event: &EngineEvent) {
        let previous = self.state;
        let next = next_state(previous, event);
        if next == previous {
            return;
        }
        self.transition(next);

        if entered_connected(previous, next) {
            if let Some(engine) = self.engine.as_ref() {
                self.subscriber.on_connected(engine).await;
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        let previous = self.state;
        log_state_transition(previous, next);
        self.state = next;
        self.stats.set_state(next);
        self.sink.record_transition(previous, next);
        self.publish_stats();
    }

    fn publish_stats(&self) {
        self.stats_tx.send_replace(self.stats.snapshot());
    }

    fn on_message(&mut self, message: &InboundMessage) {
        // Counted before classification so malformed payloads still count
        let sequence = self.stats.record_message();
        let span = message_span!(topic = %message.topic, sequence);
        let _entered = span.enter();

        let content = classify_payload(&message.payload);
        debug!(
            kind = content.kind(),
            matched = self.subscriber.covers(&message.topic),
            bytes = message.payload.len(),
            "Message received"
        );
        let report = analyze(&content);
        self.sink.record_message(&MessageObservation {
            sequence,
            topic: message.topic.clone(),
            qos: message.qos,
            retain: message.retain,
            payload_len: message.payload.len(),
            report,
        });
        self.publish_stats();
    }

    fn on_fault(&self, fault: &EngineFault) {
        warn!(
            diagnosis = fault.kind.diagnosis_tag(),
            hint = fault.kind.hint(),
            error = %fault.message,
            state = %self.state,
            "Transport fault"
        );
        self.sink.record_fault(fault);
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::PublishDiagnostic {
                topic,
                payload,
                reply,
            } => {
                let outcome = self.publish_diagnostic(topic, payload).await;
                let _ = reply.send(outcome);
            }
            SessionCommand::Disconnect { reply } => self.begin_close(reply).await,
            SessionCommand::Reconnect { reply } => {
                let result = self.reconnect().await;
                let _ = reply.send(result);
            }
        }
    }

    async fn publish_diagnostic(
        &self,
        topic: Option<String>,
        payload: Option<Vec<u8>>,
    ) -> DiagnosticOutcome {
        let engine = match self.engine.as_ref() {
            Some(engine) if can_publish(self.state) => engine,
            _ => {
                info!(state = %self.state, "Diagnostic publish skipped; not connected");
                return DiagnosticOutcome::NotConnected { state: self.state };
            }
        };
        if self.closing.is_some() {
            return DiagnosticOutcome::Failed("session is shutting down".to_string());
        }

        let topic = topic.unwrap_or_else(|| self.config.diagnostic_topic.clone());
        let payload = match payload {
            Some(payload) => payload,
            None => {
                let report = StatusReport::online(
                    self.stats.client_id(),
                    self.stats.messages_received(),
                );
                match serde_json::to_vec(&report) {
                    Ok(bytes) => bytes,
                    Err(e) => return DiagnosticOutcome::Failed(e.to_string()),
                }
            }
        };

        match engine
            .publish(&topic, payload, self.config.diagnostic_qos, false)
            .await
        {
            Ok(()) => {
                info!(topic = %topic, "Diagnostic message published");
                DiagnosticOutcome::Published { topic }
            }
            Err(e) => {
                error!(topic = %topic, error = %e, "Diagnostic publish failed");
                DiagnosticOutcome::Failed(e.to_string())
            }
        }
    }

    async fn begin_close(&mut self, reply: oneshot::Sender<StatsSnapshot>) {
        if let Some(closing) = self.closing.as_mut() {
            closing.replies.push(reply);
            return;
        }

        info!("Shutting down session");
        self.stats.report();

        let ended = match self.engine.as_mut() {
            Some(engine) => engine.end(false).await,
            None => Err(EngineError::Closed),
        };

        match ended {
            Ok(()) => {
                self.closing = Some(Closing {
                    deadline: Instant::now() + self.config.shutdown_timeout,
                    replies: vec![reply],
                });
            }
            Err(e) => {
                if self.engine.is_some() {
                    warn!(error = %e, "Graceful disconnect failed; forcing close");
                }
                self.closing = Some(Closing {
                    deadline: Instant::now(),
                    replies: vec![reply],
                });
                self.force_close().await;
            }
        }
    }

    async fn force_close(&mut self) {
        if self.state.is_closed() {
            return;
        }
        if self.closing.is_some() && self.engine.is_some() {
            warn!(
                timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                "Shutdown not acknowledged in time; forcing close"
            );
        }
        if let Some(engine) = self.engine.as_mut() {
            if let Err(e) = engine.end(true).await {
                debug!(error = %e, "Forced end reported an error");
            }
        }
        self.events = None;
        self.transition(ConnectionState::Closed);
    }

    async fn reconnect(&mut self) -> Result<(), SessionError> {
        match self.state {
            ConnectionState::Closed => Err(SessionError::Closed),
            _ if self.closing.is_some() => Err(SessionError::Closed),
            ConnectionState::Disconnected => {
                info!("Reconnecting with a fresh engine");
                if let Some(mut old) = self.engine.take() {
                    if let Err(e) = old.end(true).await {
                        debug!(error = %e, "Old engine reported an error while ending");
                    }
                }
                self.events = None;
                self.open_engine()?;
                self.transition(ConnectionState::Connecting);
                Ok(())
            }
            other => {
                info!(state = %other, "Reconnect ignored; session is not disconnected");
                Ok(())
            }
        }
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<EngineEvent>>) -> Option<EngineEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
