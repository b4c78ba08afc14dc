//! Topic subscriber invoked on every transition into `Connected`

use crate::protocol::topic_matches;
use crate::transport::{ProtocolEngine, Subscription, SubscriptionGrant};
use tracing::{debug, error, info, warn};

/// Issues the configured subscription set once per established session
///
/// Failures are logged and left alone; the next transition into `Connected`
/// issues a fresh request.
#[derive(Debug, Clone)]
pub struct TopicSubscriber {
    subscriptions: Vec<Subscription>,
    requests_issued: u64,
}

impl TopicSubscriber {
    pub fn new(subscriptions: Vec<Subscription>) -> Self {
        Self {
            subscriptions,
            requests_issued: 0,
        }
    }

    /// Whether any configured filter matches `topic`
    pub fn covers(&self, topic: &str) -> bool {
        self.subscriptions
            .iter()
            .any(|s| topic_matches(&s.filter, topic))
    }

    /// Number of subscribe requests issued so far
    pub fn requests_issued(&self) -> u64 {
        self.requests_issued
    }

    /// Issue exactly one subscribe request for the configured filters
    pub async fn on_connected<E>(&mut self, engine: &E)
    where
        E: ProtocolEngine + ?Sized,
    {
        if self.subscriptions.is_empty() {
            warn!("No topic filters configured; nothing to subscribe to");
            return;
        }

        self.requests_issued += 1;
        let filters: Vec<&str> = self.subscriptions.iter().map(|s| s.filter.as_str()).collect();
        debug!(request = self.requests_issued, ?filters, "Requesting subscriptions");

        if let Err(e) = engine.subscribe(&self.subscriptions).await {
            error!(error = %e, ?filters, "Subscription request failed");
        }
    }

    /// Log the broker's answer to a subscribe request
    pub fn on_granted(&self, grants: &[SubscriptionGrant]) {
        for grant in grants {
            match grant {
                SubscriptionGrant::Granted { filter, qos } => {
                    info!(filter = %filter, qos = u8::from(*qos), "Subscribed");
                }
                SubscriptionGrant::Rejected { filter, reason } => {
                    warn!(filter = %filter, reason = %reason, "Subscription rejected by broker");
                }
            }
        }
    }
}
