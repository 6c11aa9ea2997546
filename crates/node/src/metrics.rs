//! Connectivity metrics.
//!
//! Each component owns a struct of metric handles created once at
//! construction. Without an installed recorder the handles are no-ops,
//! which is what tests run with.

use metrics::{Counter, Gauge};

/// Metrics for connection events and the peer store.
#[derive(Clone)]
pub struct ConnectivityMetrics {
    /// Number of peer connections established.
    pub(crate) peer_connected: Counter,
    /// Number of peer disconnections.
    pub(crate) peer_disconnected: Counter,
    /// Current number of peers in the peer store.
    pub(crate) peerstore_size: Gauge,
    /// Peer notifications dropped because the subscriber channel was full.
    pub(crate) dropped_peer_events: Counter,
}

impl Default for ConnectivityMetrics {
    fn default() -> Self {
        Self {
            peer_connected: metrics::counter!("connectivity.peer_connected_total"),
            peer_disconnected: metrics::counter!("connectivity.peer_disconnected_total"),
            peerstore_size: metrics::gauge!("connectivity.peerstore_size"),
            dropped_peer_events: metrics::counter!("connectivity.dropped_peer_events_total"),
        }
    }
}

/// Metrics for the keepalive monitor.
#[derive(Clone)]
pub struct KeepaliveMetrics {
    /// Liveness probes sent.
    pub(crate) pings: Counter,
    /// Probes that failed or timed out.
    pub(crate) ping_failures: Counter,
    /// Connections closed by the monitor.
    pub(crate) forced_disconnects: Counter,
}

impl Default for KeepaliveMetrics {
    fn default() -> Self {
        Self {
            pings: metrics::counter!("keepalive.pings_total"),
            ping_failures: metrics::counter!("keepalive.ping_failures_total"),
            forced_disconnects: metrics::counter!("keepalive.forced_disconnects_total"),
        }
    }
}
