//! Pure connection state machine for the session controller
//!
//! Transitions are computed by [`next_state`] from the current state and one
//! engine event. The controller is the only caller that applies the result.

use crate::transport::EngineEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Lifecycle of the broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal; no event leaves this state
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

/// Determine next state after an engine event (pure function)
pub fn next_state(current: ConnectionState, event: &EngineEvent) -> ConnectionState {
    use ConnectionState::*;

    if current == Closed {
        return Closed;
    }

    match event {
        EngineEvent::Connected { .. } => Connected,
        EngineEvent::Offline => match current {
            Connected | Connecting => Reconnecting,
            other => other,
        },
        EngineEvent::Reconnecting => match current {
            Reconnecting | Disconnected => Connecting,
            other => other,
        },
        EngineEvent::Disconnected { .. } => Disconnected,
        EngineEvent::Closed => Closed,
        EngineEvent::Error(_)
        | EngineEvent::Message(_)
        | EngineEvent::SubscriptionGranted { .. } => current,
    }
}

/// State reached by `start()`; only a fresh session may start
pub fn start_transition(current: ConnectionState) -> Option<ConnectionState> {
    (current == ConnectionState::Disconnected).then_some(ConnectionState::Connecting)
}

/// True when this transition must trigger the topic subscriber
pub fn entered_connected(from: ConnectionState, to: ConnectionState) -> bool {
    from != ConnectionState::Connected && to == ConnectionState::Connected
}

/// Check if connection state allows publishing (pure function)
pub fn can_publish(state: ConnectionState) -> bool {
    state.is_connected()
}

/// Log connection state transition
pub fn log_state_transition(from: ConnectionState, to: ConnectionState) {
    match (from, to) {
        (ConnectionState::Connecting, ConnectionState::Connected) => {
            info!("MQTT connection established");
        }
        (ConnectionState::Reconnecting, ConnectionState::Connected) => {
            info!("Reconnection successful");
        }
        (ConnectionState::Connected, ConnectionState::Reconnecting) => {
            warn!("MQTT connection lost; engine will retry");
        }
        (ConnectionState::Connected, ConnectionState::Disconnected) => {
            warn!("Broker closed the session");
        }
        (_, ConnectionState::Closed) => {
            info!("Session closed");
        }
        _ => {
            info!("MQTT connection state: {} -> {}", from, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DeliveryQos, InboundMessage};
    use crate::transport::{EngineFault, FaultKind};
    use proptest::prelude::*;
    use ConnectionState::*;

    const ALL_STATES: [ConnectionState; 5] =
        [Disconnected, Connecting, Connected, Reconnecting, Closed];

    fn all_events() -> Vec<EngineEvent> {
        vec![
            EngineEvent::Connected {
                session_present: false,
            },
            EngineEvent::Message(InboundMessage::new("t", vec![], DeliveryQos::AtMostOnce)),
            EngineEvent::SubscriptionGranted { grants: vec![] },
            EngineEvent::Error(EngineFault::new(FaultKind::Timeout, "slow")),
            EngineEvent::Disconnected { reason: None },
            EngineEvent::Offline,
            EngineEvent::Reconnecting,
            EngineEvent::Closed,
        ]
    }

    #[test]
    fn test_connected_from_every_open_state() {
        let event = EngineEvent::Connected {
            session_present: true,
        };
        for state in [Disconnected, Connecting, Reconnecting, Connected] {
            assert_eq!(next_state(state, &event), Connected);
        }
    }

    #[test]
    fn test_offline_and_reconnecting_cycle() {
        assert_eq!(next_state(Connected, &EngineEvent::Offline), Reconnecting);
        assert_eq!(next_state(Reconnecting, &EngineEvent::Reconnecting), Connecting);
        assert_eq!(next_state(Disconnected, &EngineEvent::Reconnecting), Connecting);
        // A failed handshake notification while already connecting changes nothing
        assert_eq!(next_state(Connecting, &EngineEvent::Reconnecting), Connecting);
    }

    #[test]
    fn test_broker_disconnect() {
        let event = EngineEvent::Disconnected {
            reason: Some("ServerShuttingDown".to_string()),
        };
        assert_eq!(next_state(Connected, &event), Disconnected);
    }

    #[test]
    fn test_errors_and_messages_never_change_state() {
        let passive = [
            EngineEvent::Error(EngineFault::new(FaultKind::ConnectionRefused, "no")),
            EngineEvent::Message(InboundMessage::new("t", b"x".to_vec(), DeliveryQos::AtMostOnce)),
            EngineEvent::SubscriptionGranted { grants: vec![] },
        ];
        for state in ALL_STATES {
            for event in &passive {
                assert_eq!(next_state(state, event), state);
            }
        }
    }

    #[test]
    fn test_start_only_from_disconnected() {
        assert_eq!(start_transition(Disconnected), Some(Connecting));
        for state in [Connecting, Connected, Reconnecting, Closed] {
            assert_eq!(start_transition(state), None);
        }
    }

    #[test]
    fn test_entered_connected() {
        assert!(entered_connected(Connecting, Connected));
        assert!(entered_connected(Reconnecting, Connected));
        assert!(!entered_connected(Connected, Connected));
        assert!(!entered_connected(Connecting, Reconnecting));
    }

    #[test]
    fn test_can_publish_only_when_connected() {
        for state in ALL_STATES {
            assert_eq!(can_publish(state), state == Connected);
        }
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Reconnecting).unwrap(), "\"reconnecting\"");
        assert_eq!(Closed.to_string(), "closed");
    }

    proptest! {
        #[test]
        fn prop_closed_is_terminal(indices in proptest::collection::vec(0usize..8, 0..32)) {
            let events = all_events();
            let mut state = Closed;
            for i in indices {
                state = next_state(state, &events[i]);
                prop_assert_eq!(state, Closed);
            }
        }

        #[test]
        fn prop_closed_event_always_closes(start in 0usize..5) {
            prop_assert_eq!(next_state(ALL_STATES[start], &EngineEvent::Closed), Closed);
        }
    }
}
