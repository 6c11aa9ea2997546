//! In-memory host implementation for tests.
//!
//! [`MemoryHost`] implements the host seam over plain in-memory state so
//! connectivity logic can be exercised without a transport: connections
//! are flipped on and off directly, probe outcomes are scripted, and
//! failures can be injected into listening and subscription setup.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::network::{
    ConnectionObserver, Direction, HostError, ListenAddressesChanged, NetworkHost, PeerIdentified,
    Peerstore, ProtocolsUpdated,
};

/// Scripted result of a liveness probe.
#[derive(Debug, Clone)]
pub enum PingOutcome {
    /// The probe succeeds with the given round-trip time.
    Ok(Duration),
    /// The probe fails immediately.
    Fail,
    /// The probe never completes (exercises the caller's timeout).
    Hang,
}

#[derive(Clone, Default)]
struct PeerEntry {
    protocols: Vec<StreamProtocol>,
    addresses: Vec<Multiaddr>,
    direction: Option<Direction>,
}

/// In-memory peer metadata store.
#[derive(Default)]
pub struct MemoryPeerstore {
    peers: Mutex<HashMap<PeerId, PeerEntry>>,
    fail_direction_writes: AtomicBool,
}

impl MemoryPeerstore {
    /// Seed a peer with its supported protocols and addresses.
    pub fn add_peer(
        &self,
        peer_id: PeerId,
        protocols: Vec<StreamProtocol>,
        addresses: Vec<Multiaddr>,
    ) {
        self.peers.lock().insert(
            peer_id,
            PeerEntry {
                protocols,
                addresses,
                direction: None,
            },
        );
    }

    /// The recorded connection direction for a peer, if any.
    pub fn direction(&self, peer_id: &PeerId) -> Option<Direction> {
        self.peers.lock().get(peer_id).and_then(|e| e.direction)
    }

    /// Make subsequent direction writes fail.
    pub fn fail_direction_writes(&self, fail: bool) {
        self.fail_direction_writes.store(fail, Ordering::Relaxed);
    }
}

impl Peerstore for MemoryPeerstore {
    fn known_peers(&self) -> Vec<PeerId> {
        self.peers.lock().keys().copied().collect()
    }

    fn protocols(&self, peer_id: &PeerId) -> Vec<StreamProtocol> {
        self.peers
            .lock()
            .get(peer_id)
            .map(|e| e.protocols.clone())
            .unwrap_or_default()
    }

    fn addresses(&self, peer_id: &PeerId) -> Vec<Multiaddr> {
        self.peers
            .lock()
            .get(peer_id)
            .map(|e| e.addresses.clone())
            .unwrap_or_default()
    }

    fn set_direction(&self, peer_id: &PeerId, direction: Direction) -> Result<(), HostError> {
        if self.fail_direction_writes.load(Ordering::Relaxed) {
            return Err(HostError::Peerstore("write disabled".into()));
        }
        self.peers.lock().entry(*peer_id).or_default().direction = Some(direction);
        Ok(())
    }

    fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }
}

/// In-memory [`NetworkHost`].
pub struct MemoryHost {
    local_peer_id: PeerId,
    peerstore: Arc<MemoryPeerstore>,
    connected: Mutex<HashSet<PeerId>>,
    closed: Mutex<Vec<PeerId>>,
    listen_addrs: Mutex<Vec<Multiaddr>>,
    default_ping: Mutex<PingOutcome>,
    ping_count: AtomicU64,
    observer: Mutex<Option<Arc<dyn ConnectionObserver>>>,
    protocol_events: broadcast::Sender<ProtocolsUpdated>,
    identified_events: broadcast::Sender<PeerIdentified>,
    address_events: broadcast::Sender<ListenAddressesChanged>,
    fail_subscriptions: AtomicBool,
    fail_listen: AtomicBool,
    listening: AtomicBool,
    closed_down: AtomicBool,
}

impl MemoryHost {
    pub fn new() -> Arc<Self> {
        let (protocol_events, _) = broadcast::channel(32);
        let (identified_events, _) = broadcast::channel(32);
        let (address_events, _) = broadcast::channel(32);
        Arc::new(MemoryHost {
            local_peer_id: PeerId::random(),
            peerstore: Arc::new(MemoryPeerstore::default()),
            connected: Mutex::new(HashSet::new()),
            closed: Mutex::new(Vec::new()),
            listen_addrs: Mutex::new(Vec::new()),
            default_ping: Mutex::new(PingOutcome::Ok(Duration::from_millis(10))),
            ping_count: AtomicU64::new(0),
            observer: Mutex::new(None),
            protocol_events,
            identified_events,
            address_events,
            fail_subscriptions: AtomicBool::new(false),
            fail_listen: AtomicBool::new(false),
            listening: AtomicBool::new(false),
            closed_down: AtomicBool::new(false),
        })
    }

    /// Typed access to the in-memory peer store.
    pub fn memory_peerstore(&self) -> Arc<MemoryPeerstore> {
        self.peerstore.clone()
    }

    /// Mark a peer connected without notifying the observer.
    pub async fn add_connected_peer(&self, peer_id: PeerId) {
        self.connected.lock().insert(peer_id);
    }

    /// Mark a peer disconnected without notifying the observer.
    pub async fn remove_connected_peer(&self, peer_id: &PeerId) {
        self.connected.lock().remove(peer_id);
    }

    /// Establish a connection and deliver the connect callback.
    pub async fn connect_peer(&self, peer_id: PeerId, direction: Direction) {
        self.connected.lock().insert(peer_id);
        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer.on_connected(peer_id, direction).await;
        }
    }

    /// Drop a connection and deliver the disconnect callback.
    pub async fn disconnect_peer(&self, peer_id: PeerId) {
        self.connected.lock().remove(&peer_id);
        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer.on_disconnected(peer_id).await;
        }
    }

    /// Script the outcome of future probes.
    pub fn set_default_ping(&self, outcome: PingOutcome) {
        *self.default_ping.lock() = outcome;
    }

    /// Peers closed through [`NetworkHost::close_peer`], in order.
    pub fn closed_peers(&self) -> Vec<PeerId> {
        self.closed.lock().clone()
    }

    /// Number of probes attempted.
    pub fn ping_count(&self) -> u64 {
        self.ping_count.load(Ordering::Relaxed)
    }

    /// Replace the listen address set without emitting an event.
    pub fn set_listen_addresses(&self, addresses: Vec<Multiaddr>) {
        *self.listen_addrs.lock() = addresses;
    }

    /// Replace the listen address set and emit the change event.
    pub fn emit_listen_addresses(&self, addresses: Vec<Multiaddr>) {
        *self.listen_addrs.lock() = addresses.clone();
        let _ = self.address_events.send(ListenAddressesChanged { addresses });
    }

    /// Emit an identification-completed event.
    pub fn emit_identified(&self, peer_id: PeerId) {
        let _ = self.identified_events.send(PeerIdentified { peer_id });
    }

    /// Emit a protocol-list-updated event.
    pub fn emit_protocols_updated(&self, peer_id: PeerId) {
        let _ = self.protocol_events.send(ProtocolsUpdated { peer_id });
    }

    /// Make subscription setup fail.
    pub fn fail_subscriptions(&self, fail: bool) {
        self.fail_subscriptions.store(fail, Ordering::Relaxed);
    }

    /// Make listen setup fail.
    pub fn fail_listen(&self, fail: bool) {
        self.fail_listen.store(fail, Ordering::Relaxed);
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed_down.load(Ordering::Relaxed)
    }

    pub fn has_observer(&self) -> bool {
        self.observer.lock().is_some()
    }
}

#[async_trait]
impl NetworkHost for MemoryHost {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.connected.lock().iter().copied().collect()
    }

    fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.connected.lock().contains(peer_id)
    }

    async fn close_peer(&self, peer_id: &PeerId) -> Result<(), HostError> {
        let was_connected = self.connected.lock().remove(peer_id);
        if was_connected {
            self.closed.lock().push(*peer_id);
            let observer = self.observer.lock().clone();
            if let Some(observer) = observer {
                observer.on_disconnected(*peer_id).await;
            }
        }
        Ok(())
    }

    async fn ping(&self, peer_id: &PeerId) -> Result<Duration, HostError> {
        self.ping_count.fetch_add(1, Ordering::Relaxed);
        if !self.is_connected(peer_id) {
            return Err(HostError::ProbeFailed {
                peer_id: *peer_id,
                reason: "not connected".into(),
            });
        }
        let outcome = self.default_ping.lock().clone();
        match outcome {
            PingOutcome::Ok(rtt) => Ok(rtt),
            PingOutcome::Fail => Err(HostError::ProbeFailed {
                peer_id: *peer_id,
                reason: "probe refused".into(),
            }),
            PingOutcome::Hang => futures::future::pending().await,
        }
    }

    fn listen_addresses(&self) -> Vec<Multiaddr> {
        self.listen_addrs.lock().clone()
    }

    fn peerstore(&self) -> Arc<dyn Peerstore> {
        self.peerstore.clone()
    }

    async fn start_listening(&self) -> Result<(), HostError> {
        if self.fail_listen.load(Ordering::Relaxed) {
            return Err(HostError::Listen("bind refused".into()));
        }
        self.listening.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) {
        self.closed_down.store(true, Ordering::Relaxed);
        self.connected.lock().clear();
    }

    fn subscribe_protocol_updates(
        &self,
    ) -> Result<broadcast::Receiver<ProtocolsUpdated>, HostError> {
        if self.fail_subscriptions.load(Ordering::Relaxed) {
            return Err(HostError::Subscription("protocol updates"));
        }
        Ok(self.protocol_events.subscribe())
    }

    fn subscribe_identified(&self) -> Result<broadcast::Receiver<PeerIdentified>, HostError> {
        if self.fail_subscriptions.load(Ordering::Relaxed) {
            return Err(HostError::Subscription("identification"));
        }
        Ok(self.identified_events.subscribe())
    }

    fn subscribe_address_changes(
        &self,
    ) -> Result<broadcast::Receiver<ListenAddressesChanged>, HostError> {
        if self.fail_subscriptions.load(Ordering::Relaxed) {
            return Err(HostError::Subscription("address changes"));
        }
        Ok(self.address_events.subscribe())
    }

    fn set_connection_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        *self.observer.lock() = Some(observer);
    }

    fn clear_connection_observer(&self) {
        *self.observer.lock() = None;
    }
}
