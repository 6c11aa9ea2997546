//! Protocol identifiers used across the node.

use libp2p::StreamProtocol;

/// Gossip relay protocol.
pub const RELAY_PROTOCOL: StreamProtocol = StreamProtocol::new("/murmur/2/relay/1.0.0");

/// Historical message store protocol.
pub const STORE_PROTOCOL: StreamProtocol = StreamProtocol::new("/murmur/2/store/1.0.0");

/// Content filter protocol.
pub const FILTER_PROTOCOL: StreamProtocol = StreamProtocol::new("/murmur/2/filter/1.0.0");

/// Light-client message push protocol.
pub const PUSH_PROTOCOL: StreamProtocol = StreamProtocol::new("/murmur/2/push/1.0.0");

/// Protocols a peer can serve us with; any of these counts towards being
/// online.
pub const CORE_PROTOCOLS: [StreamProtocol; 4] = [
    RELAY_PROTOCOL,
    STORE_PROTOCOL,
    FILTER_PROTOCOL,
    PUSH_PROTOCOL,
];

/// Circuit-relay hop protocol advertised by peers able to relay for us.
pub const RELAY_HOP_PROTOCOL: StreamProtocol =
    StreamProtocol::new("/libp2p/circuit/relay/0.2.0/hop");
