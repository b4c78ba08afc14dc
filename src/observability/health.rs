//! HTTP status server
//!
//! Serves the controller's latest [`StatsSnapshot`] read from a `watch`
//! channel. The server never touches controller state directly.

use crate::session::{ConnectionState, StatsSnapshot};
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::sync::watch;
use warp::http::StatusCode;
use warp::Filter;

/// HTTP status server over a stats snapshot channel
pub struct StatusServer {
    port: u16,
    stats_rx: watch::Receiver<StatsSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub client_id: String,
    pub state: ConnectionState,
    pub messages_received: u64,
    pub uptime_seconds: i64,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: BTreeMap<&'static str, &'static str>,
}

impl StatusServer {
    pub fn new(port: u16, stats_rx: watch::Receiver<StatsSnapshot>) -> Self {
        Self { port, stats_rx }
    }

    /// Serve until the process exits
    pub async fn start(self) {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!(port = self.port, "Starting status server");
        warp::serve(routes(self.stats_rx)).run(addr).await;
    }
}

/// Overall health for a snapshot (pure function)
pub fn health_status(snapshot: &StatsSnapshot) -> HealthStatus {
    let status = match snapshot.state {
        ConnectionState::Connected => "healthy",
        ConnectionState::Connecting | ConnectionState::Reconnecting => "degraded",
        ConnectionState::Disconnected | ConnectionState::Closed => "unhealthy",
    };

    HealthStatus {
        status,
        client_id: snapshot.client_id.clone(),
        state: snapshot.state,
        messages_received: snapshot.messages_received,
        uptime_seconds: (chrono::Utc::now() - snapshot.started_at).num_seconds().max(0),
    }
}

/// Build the route tree; split out so tests can drive it with `warp::test`
pub fn routes(
    stats_rx: watch::Receiver<StatsSnapshot>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let with_stats = warp::any().map(move || stats_rx.clone());

    // GET /health - 200 only while connected
    let health_route = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_stats.clone())
        .and_then(|rx: watch::Receiver<StatsSnapshot>| async move {
            let health = health_status(&rx.borrow());
            let code = if health.status == "healthy" {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&health), code))
        });

    // GET /stats - latest snapshot
    let stats_route = warp::path("stats")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_stats)
        .and_then(|rx: watch::Receiver<StatsSnapshot>| async move {
            let snapshot = rx.borrow().clone();
            Ok::<_, Infallible>(warp::reply::json(&snapshot))
        });

    let root_route = warp::path::end().and(warp::get()).map(|| {
        let mut endpoints = BTreeMap::new();
        endpoints.insert("/health", "Connection health; 503 unless connected");
        endpoints.insert("/stats", "Run statistics snapshot");
        warp::reply::json(&ApiDocumentationResponse { endpoints })
    });

    health_route.or(stats_route).or(root_route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RunStats;

    fn snapshot(state: ConnectionState, messages: u64) -> StatsSnapshot {
        let mut stats = RunStats::new("status-test", "mqtt://localhost:1883");
        stats.set_state(state);
        for _ in 0..messages {
            stats.record_message();
        }
        stats.snapshot()
    }

    #[test]
    fn test_health_status_by_state() {
        assert_eq!(health_status(&snapshot(ConnectionState::Connected, 0)).status, "healthy");
        assert_eq!(
            health_status(&snapshot(ConnectionState::Reconnecting, 0)).status,
            "degraded"
        );
        assert_eq!(health_status(&snapshot(ConnectionState::Closed, 0)).status, "unhealthy");
    }

    #[tokio::test]
    async fn test_health_route_status_codes() {
        let (tx, rx) = watch::channel(snapshot(ConnectionState::Connecting, 0));
        let api = routes(rx);

        let response = warp::test::request().path("/health").reply(&api).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        tx.send(snapshot(ConnectionState::Connected, 3)).unwrap();
        let response = warp::test::request().path("/health").reply(&api).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["messages_received"], 3);
        assert_eq!(body["state"], "connected");
    }

    #[tokio::test]
    async fn test_stats_route_returns_snapshot() {
        let (_tx, rx) = watch::channel(snapshot(ConnectionState::Connected, 5));
        let api = routes(rx);

        let response = warp::test::request().path("/stats").reply(&api).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: StatsSnapshot = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body.messages_received, 5);
        assert!(body.connected);
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (_tx, rx) = watch::channel(snapshot(ConnectionState::Connected, 0));
        let api = routes(rx);
        let response = warp::test::request().path("/metrics").reply(&api).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
