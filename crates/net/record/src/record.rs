//! The node's signed, versioned self-address record.

use std::net::{Ipv4Addr, Ipv6Addr};

use libp2p::Multiaddr;
use libp2p::identity::{Keypair, PublicKey};

use crate::error::RecordError;
use crate::shard::ShardList;

/// Node capability bitfield carried in the record.
///
/// Tells remote peers which of the core protocols this node serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    /// The node participates in gossip relay.
    pub const RELAY: Capabilities = Capabilities(1 << 0);
    /// The node serves historical messages.
    pub const STORE: Capabilities = Capabilities(1 << 1);
    /// The node serves content-filter subscriptions.
    pub const FILTER: Capabilities = Capabilities(1 << 2);
    /// The node accepts pushed messages from light clients.
    pub const PUSH: Capabilities = Capabilities(1 << 3);

    /// No capabilities.
    pub const fn none() -> Self {
        Capabilities(0)
    }

    /// Combine with another capability set.
    pub const fn with(self, other: Capabilities) -> Self {
        Capabilities(self.0 | other.0)
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    /// The raw bitfield value.
    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// The local node's address record.
///
/// Created once at node construction and refreshed in place for the life
/// of the process. Every committed change increments the sequence number
/// and re-signs the content, so remote peers can always pick the newest
/// version of two competing records.
#[derive(Debug, Clone)]
pub struct LocalRecord {
    seq: u64,
    ip4: Option<Ipv4Addr>,
    ip6: Option<Ipv6Addr>,
    tcp: Option<u16>,
    udp: Option<u16>,
    caps: Capabilities,
    multiaddrs: Vec<Multiaddr>,
    shards: Option<ShardList>,
    signature: Vec<u8>,
}

impl LocalRecord {
    /// Create and sign an empty record.
    pub fn new(keypair: &Keypair) -> Result<Self, RecordError> {
        let mut record = LocalRecord {
            seq: 0,
            ip4: None,
            ip6: None,
            tcp: None,
            udp: None,
            caps: Capabilities::none(),
            multiaddrs: Vec::new(),
            shards: None,
            signature: Vec::new(),
        };
        record.sign_and_bump(keypair)?;
        Ok(record)
    }

    /// Monotonically increasing record version.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The advertised IPv4 endpoint address, if any.
    pub fn ip4(&self) -> Option<Ipv4Addr> {
        self.ip4
    }

    /// The advertised IPv6 endpoint address, if any.
    pub fn ip6(&self) -> Option<Ipv6Addr> {
        self.ip6
    }

    /// The advertised TCP port, if any.
    pub fn tcp(&self) -> Option<u16> {
        self.tcp
    }

    /// The advertised UDP port, if any.
    pub fn udp(&self) -> Option<u16> {
        self.udp
    }

    /// The capability bitfield.
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Multiaddrs advertised verbatim (circuit-relay or secure-websocket
    /// reachability paths that the raw IP/port fields cannot express).
    pub fn multiaddrs(&self) -> &[Multiaddr] {
        &self.multiaddrs
    }

    /// The shard membership list, if the node participates in static shards.
    pub fn shards(&self) -> Option<&ShardList> {
        self.shards.as_ref()
    }

    /// Signature over the current content and sequence number.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn set_ip4(&mut self, ip: Option<Ipv4Addr>) {
        self.ip4 = ip;
    }

    pub fn set_ip6(&mut self, ip: Option<Ipv6Addr>) {
        self.ip6 = ip;
    }

    pub fn set_tcp(&mut self, port: Option<u16>) {
        self.tcp = port;
    }

    pub fn set_udp(&mut self, port: Option<u16>) {
        self.udp = port;
    }

    pub fn set_capabilities(&mut self, caps: Capabilities) {
        self.caps = caps;
    }

    pub fn set_multiaddrs(&mut self, addrs: Vec<Multiaddr>) {
        self.multiaddrs = addrs;
    }

    pub fn set_shards(&mut self, shards: Option<ShardList>) {
        self.shards = shards;
    }

    /// Whether two records carry the same content, ignoring sequence
    /// number and signature.
    pub fn content_eq(&self, other: &LocalRecord) -> bool {
        self.ip4 == other.ip4
            && self.ip6 == other.ip6
            && self.tcp == other.tcp
            && self.udp == other.udp
            && self.caps == other.caps
            && self.multiaddrs == other.multiaddrs
            && self.shards == other.shards
    }

    /// Increment the sequence number and re-sign the content.
    pub fn sign_and_bump(&mut self, keypair: &Keypair) -> Result<(), RecordError> {
        self.seq += 1;
        self.signature = keypair.sign(&self.signing_preimage())?;
        Ok(())
    }

    /// Verify the record signature against the node's public key.
    pub fn verify(&self, public_key: &PublicKey) -> bool {
        public_key.verify(&self.signing_preimage(), &self.signature)
    }

    /// Deterministic byte encoding of seq + content used as the signing
    /// preimage. Not a wire format; only stability across re-encodings of
    /// the same content matters.
    fn signing_preimage(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&self.seq.to_be_bytes());
        match self.ip4 {
            Some(ip) => {
                buf.push(1);
                buf.extend_from_slice(&ip.octets());
            }
            None => buf.push(0),
        }
        match self.ip6 {
            Some(ip) => {
                buf.push(1);
                buf.extend_from_slice(&ip.octets());
            }
            None => buf.push(0),
        }
        buf.extend_from_slice(&self.tcp.unwrap_or(0).to_be_bytes());
        buf.extend_from_slice(&self.udp.unwrap_or(0).to_be_bytes());
        buf.push(self.caps.bits());
        buf.extend_from_slice(&(self.multiaddrs.len() as u32).to_be_bytes());
        for addr in &self.multiaddrs {
            let bytes = addr.to_vec();
            buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            buf.extend_from_slice(&bytes);
        }
        if let Some(shards) = &self.shards {
            buf.push(1);
            buf.extend_from_slice(&shards.cluster.to_be_bytes());
            for index in &shards.indices {
                buf.extend_from_slice(&index.to_be_bytes());
            }
        } else {
            buf.push(0);
        }
        buf
    }
}
