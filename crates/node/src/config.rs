//! Node configuration.

use std::net::IpAddr;

use libp2p::Multiaddr;
use murmur_net_record::{Capabilities, UpdateOptions};

use crate::keepalive::KeepaliveConfig;

/// Connectivity configuration for a node.
///
/// Assembled by the embedding binary; everything has a workable default.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Keepalive probing policy.
    pub keepalive: KeepaliveConfig,
    /// Capabilities advertised in the node record.
    pub capabilities: Capabilities,
    /// UDP discovery port advertised in the node record.
    pub udp_port: Option<u16>,
    /// TCP port used when the record endpoint is statically configured.
    pub tcp_port: Option<u16>,
    /// Statically configured external address. Only consulted when
    /// `auto_update_record` is off.
    pub external_ip: Option<IpAddr>,
    /// Operator-supplied addresses to advertise instead of anything
    /// inferred from the listen addresses.
    pub advertise_override: Option<Vec<Multiaddr>>,
    /// Whether the record endpoint may be auto-detected and kept fresh by
    /// the discovery subsystem.
    pub auto_update_record: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            keepalive: KeepaliveConfig::default(),
            capabilities: Capabilities::RELAY,
            udp_port: None,
            tcp_port: None,
            external_ip: None,
            advertise_override: None,
            auto_update_record: true,
        }
    }
}

impl NodeConfig {
    /// The record update policy implied by this configuration.
    pub(crate) fn update_options(&self) -> UpdateOptions {
        UpdateOptions {
            capabilities: self.capabilities,
            udp_port: self.udp_port,
            tcp_port: self.tcp_port,
            external_ip: self.external_ip,
            advertise_override: self.advertise_override.clone(),
            auto_update: self.auto_update_record,
        }
    }
}
