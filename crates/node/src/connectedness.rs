//! Connection event bookkeeping and fan-out.
//!
//! [`ConnectionNotifier`] sits between the host's raw connect/disconnect
//! callbacks and the rest of the node: it records per-connection metadata,
//! keeps the connectivity metrics current, feeds the orchestrator's
//! disconnect channel, and forwards a simplified event to an optional
//! external subscriber without ever blocking the host.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use libp2p::{PeerId, StreamProtocol};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::metrics::ConnectivityMetrics;
use crate::network::{ConnectionObserver, Direction, Peerstore};

/// Capacity of the disconnect channel. Sized generously so the producer
/// side never blocks in normal operation.
pub const DISCONNECT_CHANNEL_CAPACITY: usize = 100;

/// A simplified connect/disconnect notification for external subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvent {
    /// The affected peer.
    pub peer_id: PeerId,
    /// `true` on connect, `false` on disconnect.
    pub connected: bool,
}

/// Aggregate connectivity status pushed to the optional status channel.
#[derive(Debug, Clone, Default)]
pub struct ConnStatus {
    /// Whether at least one connected peer serves a core protocol.
    pub is_online: bool,
    /// Whether at least one connected peer can serve message history.
    pub has_history: bool,
    /// Connected peers grouped by the protocols they support.
    pub peer_stats: HashMap<StreamProtocol, Vec<PeerId>>,
}

/// Compute the aggregate connectivity status from the live connection set.
pub fn connection_status(host: &dyn crate::network::NetworkHost) -> ConnStatus {
    let peerstore = host.peerstore();
    let mut status = ConnStatus::default();

    for peer_id in host.connected_peers() {
        for protocol in peerstore.protocols(&peer_id) {
            if crate::constants::CORE_PROTOCOLS.contains(&protocol) {
                status.is_online = true;
            }
            if protocol == crate::constants::STORE_PROTOCOL {
                status.has_history = true;
            }
            status.peer_stats.entry(protocol).or_default().push(peer_id);
        }
    }

    status
}

/// Translates host connection callbacks into metrics, peer store writes,
/// and channel notifications.
pub struct ConnectionNotifier {
    peerstore: Arc<dyn Peerstore>,
    metrics: ConnectivityMetrics,
    disconnect_tx: mpsc::Sender<PeerId>,
    peer_events_tx: Option<mpsc::Sender<PeerEvent>>,
    dropped_events: AtomicU64,
}

impl ConnectionNotifier {
    /// Create the notifier and the receiving half of the disconnect
    /// channel consumed by the connectivity-status loop.
    pub fn new(
        peerstore: Arc<dyn Peerstore>,
        peer_events_tx: Option<mpsc::Sender<PeerEvent>>,
    ) -> (Self, mpsc::Receiver<PeerId>) {
        let (disconnect_tx, disconnect_rx) = mpsc::channel(DISCONNECT_CHANNEL_CAPACITY);
        let notifier = ConnectionNotifier {
            peerstore,
            metrics: ConnectivityMetrics::default(),
            disconnect_tx,
            peer_events_tx,
            dropped_events: AtomicU64::new(0),
        };
        (notifier, disconnect_rx)
    }

    /// Number of subscriber notifications dropped because the channel was
    /// full.
    pub fn dropped_peer_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Best-effort forward to the external subscriber. The channel is
    /// never awaited; a full channel drops the event and counts the drop.
    fn forward_peer_event(&self, event: PeerEvent) {
        let Some(tx) = &self.peer_events_tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                self.metrics.dropped_peer_events.increment(1);
                warn!(peer_id = %event.peer_id, "peer event subscriber full, dropping notification");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("peer event subscriber gone");
            }
        }
    }
}

#[async_trait]
impl ConnectionObserver for ConnectionNotifier {
    async fn on_connected(&self, peer_id: PeerId, direction: Direction) {
        debug!(%peer_id, ?direction, "peer connected");

        // A metadata write failure must never break the connection itself.
        if let Err(error) = self.peerstore.set_direction(&peer_id, direction) {
            warn!(%peer_id, %error, "failed to record connection direction");
        }

        self.metrics.peer_connected.increment(1);
        self.metrics
            .peerstore_size
            .set(self.peerstore.peer_count() as f64);

        self.forward_peer_event(PeerEvent {
            peer_id,
            connected: true,
        });
    }

    async fn on_disconnected(&self, peer_id: PeerId) {
        debug!(%peer_id, "peer disconnected");

        self.metrics.peer_disconnected.increment(1);
        self.metrics
            .peerstore_size
            .set(self.peerstore.peer_count() as f64);

        // This send may wait if the channel is full; the capacity is
        // chosen so that it does not in normal operation.
        if self.disconnect_tx.send(peer_id).await.is_err() {
            debug!(%peer_id, "disconnect channel consumer gone");
        }

        self.forward_peer_event(PeerEvent {
            peer_id,
            connected: false,
        });
    }
}
