//! Run statistics owned by the session controller
//!
//! [`RunStats`] is mutated only on the controller's event path. Everyone else
//! sees [`StatsSnapshot`] copies published over a `watch` channel.

use super::state::ConnectionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone)]
pub struct RunStats {
    messages_received: u64,
    sessions_established: u64,
    client_id: String,
    broker_url: String,
    state: ConnectionState,
    started_at: DateTime<Utc>,
    last_message_at: Option<DateTime<Utc>>,
}

/// Point-in-time copy of the run statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub messages_received: u64,
    pub sessions_established: u64,
    pub client_id: String,
    pub connected: bool,
    pub state: ConnectionState,
    pub broker_url: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
}

impl RunStats {
    pub fn new(client_id: impl Into<String>, broker_url: impl Into<String>) -> Self {
        Self {
            messages_received: 0,
            sessions_established: 0,
            client_id: client_id.into(),
            broker_url: broker_url.into(),
            state: ConnectionState::Disconnected,
            started_at: Utc::now(),
            last_message_at: None,
        }
    }

    /// Count one delivered message; the counter never decreases
    pub fn record_message(&mut self) -> u64 {
        self.messages_received = self.messages_received.saturating_add(1);
        self.last_message_at = Some(Utc::now());
        self.messages_received
    }

    pub fn record_session(&mut self) {
        self.sessions_established = self.sessions_established.saturating_add(1);
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_received: self.messages_received,
            sessions_established: self.sessions_established,
            client_id: self.client_id.clone(),
            connected: self.state.is_connected(),
            state: self.state,
            broker_url: self.broker_url.clone(),
            started_at: self.started_at,
            last_message_at: self.last_message_at,
        }
    }

    /// Emit the stats report logged at shutdown
    pub fn report(&self) {
        let uptime_secs = (Utc::now() - self.started_at).num_seconds().max(0);
        info!(
            client_id = %self.client_id,
            broker_url = %self.broker_url,
            messages_received = self.messages_received,
            sessions_established = self.sessions_established,
            state = %self.state,
            uptime_secs,
            "Run statistics"
        );
    }
}
