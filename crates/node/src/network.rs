//! The seam between this crate and the underlying host/network library.
//!
//! Transport, security, and multiplexing live behind [`NetworkHost`]; this
//! crate only consumes the pieces it needs: the live connection set, an
//! idempotent per-peer close, a liveness probe, listen addresses, the
//! peer store, and three event subscriptions. Connect/disconnect callbacks
//! flow the other way through [`ConnectionObserver`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use tokio::sync::broadcast;

/// Errors surfaced by the host layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    /// The host failed to bind its listen addresses.
    #[error("listen setup failed: {0}")]
    Listen(String),

    /// A required event subscription could not be established.
    #[error("event subscription unavailable: {0}")]
    Subscription(&'static str),

    /// A probe did not complete.
    #[error("probe to {peer_id} failed: {reason}")]
    ProbeFailed {
        /// The probed peer.
        peer_id: PeerId,
        /// Host-supplied failure detail.
        reason: String,
    },

    /// A peer store write was rejected.
    #[error("peer store write failed: {0}")]
    Peerstore(String),
}

/// Direction of an established connection, recorded at connect time and
/// never mutated for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The remote peer dialed us.
    Inbound,
    /// We dialed the remote peer.
    Outbound,
}

/// A peer's supported-protocol list changed.
#[derive(Debug, Clone)]
pub struct ProtocolsUpdated {
    /// The peer whose protocol list changed.
    pub peer_id: PeerId,
}

/// The identification exchange with a peer completed.
#[derive(Debug, Clone)]
pub struct PeerIdentified {
    /// The identified peer.
    pub peer_id: PeerId,
}

/// The node's set of listen/observed addresses changed.
#[derive(Debug, Clone)]
pub struct ListenAddressesChanged {
    /// The full current address set.
    pub addresses: Vec<Multiaddr>,
}

/// Receives raw connect/disconnect callbacks from the host.
#[async_trait]
pub trait ConnectionObserver: Send + Sync {
    /// A connection to `peer_id` was established.
    async fn on_connected(&self, peer_id: PeerId, direction: Direction);

    /// The last connection to `peer_id` was closed.
    async fn on_disconnected(&self, peer_id: PeerId);
}

/// Read/write access to the host's peer metadata store.
pub trait Peerstore: Send + Sync {
    /// Every peer the store knows about, connected or not.
    fn known_peers(&self) -> Vec<PeerId>;

    /// Protocols the peer is known to support.
    fn protocols(&self, peer_id: &PeerId) -> Vec<StreamProtocol>;

    /// Known dialable addresses for the peer.
    fn addresses(&self, peer_id: &PeerId) -> Vec<Multiaddr>;

    /// Record the direction of the peer's current connection.
    fn set_direction(&self, peer_id: &PeerId, direction: Direction) -> Result<(), HostError>;

    /// Number of peers in the store.
    fn peer_count(&self) -> usize;
}

/// The host/network library surface this crate consumes.
#[async_trait]
pub trait NetworkHost: Send + Sync {
    /// Our own peer identifier.
    fn local_peer_id(&self) -> PeerId;

    /// Peers with at least one live connection.
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Whether the peer currently has a live connection.
    fn is_connected(&self, peer_id: &PeerId) -> bool;

    /// Close every connection to the peer. Closing an already-closed peer
    /// is not an error.
    async fn close_peer(&self, peer_id: &PeerId) -> Result<(), HostError>;

    /// Round-trip liveness probe. The caller bounds the wait with its own
    /// timeout.
    async fn ping(&self, peer_id: &PeerId) -> Result<Duration, HostError>;

    /// The node's current listen/observed addresses.
    fn listen_addresses(&self) -> Vec<Multiaddr>;

    /// The host's peer metadata store.
    fn peerstore(&self) -> Arc<dyn Peerstore>;

    /// Bind the configured listen addresses.
    async fn start_listening(&self) -> Result<(), HostError>;

    /// Tear down the host and all remaining connections.
    async fn close(&self);

    /// Subscribe to peer protocol-list updates.
    fn subscribe_protocol_updates(
        &self,
    ) -> Result<broadcast::Receiver<ProtocolsUpdated>, HostError>;

    /// Subscribe to identification-completed events.
    fn subscribe_identified(&self) -> Result<broadcast::Receiver<PeerIdentified>, HostError>;

    /// Subscribe to listen-address changes.
    fn subscribe_address_changes(
        &self,
    ) -> Result<broadcast::Receiver<ListenAddressesChanged>, HostError>;

    /// Install the connection observer. At most one observer is active.
    fn set_connection_observer(&self, observer: Arc<dyn ConnectionObserver>);

    /// Remove the active connection observer, if any.
    fn clear_connection_observer(&self);
}
