//! Relay candidate discovery.
//!
//! Nodes behind restrictive NATs obtain reachability through circuit
//! relays. The external auto-relay mechanism asks for candidates on
//! demand; this module scans the peer store for peers that advertise the
//! relay hop protocol and feeds them back through a consumer-driven
//! channel.

use std::sync::Arc;

use libp2p::{Multiaddr, PeerId};
use rand::seq::SliceRandom;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::constants::RELAY_HOP_PROTOCOL;
use crate::network::Peerstore;

/// A peer able to act as a circuit relay for us.
#[derive(Debug, Clone)]
pub struct RelayCandidate {
    /// The candidate peer.
    pub peer_id: PeerId,
    /// Its known dialable addresses.
    pub addresses: Vec<Multiaddr>,
}

/// A request for relay candidates from the auto-relay consumer.
#[derive(Debug)]
pub struct RelayDemand {
    /// How many candidates the consumer currently wants.
    pub count: usize,
    /// Where to deliver them.
    pub tx: mpsc::Sender<RelayCandidate>,
}

/// Handle used by the external auto-relay mechanism to request candidates.
#[derive(Clone)]
pub struct RelaySource {
    demand_tx: mpsc::Sender<RelayDemand>,
}

impl RelaySource {
    pub(crate) fn new(demand_tx: mpsc::Sender<RelayDemand>) -> Self {
        RelaySource { demand_tx }
    }

    /// Ask for up to `count` relay candidates.
    ///
    /// The returned channel yields at most `count` candidates and then
    /// closes; fewer than `count` means the known-peer set was exhausted.
    /// If the node has stopped, the channel closes immediately.
    pub async fn request(&self, count: usize) -> mpsc::Receiver<RelayCandidate> {
        let (tx, rx) = mpsc::channel(count.max(1));
        if self.demand_tx.send(RelayDemand { count, tx }).await.is_err() {
            debug!("relay feeder is not running");
        }
        rx
    }
}

/// Produce up to `count` relay candidates into `tx`.
///
/// The known-peer list is shuffled first so repeated requests do not keep
/// favoring the same peers. Cancellation is honored at every yield point.
/// Exhausting the peer set early simply closes the channel.
pub(crate) async fn feed_candidates(
    peerstore: Arc<dyn Peerstore>,
    count: usize,
    tx: mpsc::Sender<RelayCandidate>,
    mut shutdown: watch::Receiver<()>,
) {
    let mut peers = peerstore.known_peers();
    peers.shuffle(&mut rand::rng());

    let mut sent = 0usize;
    for peer_id in peers {
        if sent >= count {
            break;
        }
        let supports_hop = peerstore
            .protocols(&peer_id)
            .iter()
            .any(|p| *p == RELAY_HOP_PROTOCOL);
        if !supports_hop {
            continue;
        }

        let candidate = RelayCandidate {
            peer_id,
            addresses: peerstore.addresses(&peer_id),
        };

        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                debug!("relay candidate feed cancelled");
                return;
            }

            result = tx.send(candidate) => {
                if result.is_err() {
                    debug!("relay candidate consumer gone");
                    return;
                }
                sent += 1;
            }
        }
    }

    trace!(sent, requested = count, "relay candidate feed finished");
}

/// Serve relay-candidate demand until shutdown.
pub(crate) async fn run_relay_feeder(
    peerstore: Arc<dyn Peerstore>,
    mut demand_rx: mpsc::Receiver<RelayDemand>,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                debug!("relay feeder stopping");
                break;
            }

            demand = demand_rx.recv() => match demand {
                Some(RelayDemand { count, tx }) => {
                    trace!(count, "relay candidates requested");
                    feed_candidates(peerstore.clone(), count, tx, shutdown.clone()).await;
                }
                None => break,
            }
        }
    }
}
