//! IP address scope classification and endpoint selection.
//!
//! The record updater needs to pick one IP endpoint out of the node's
//! listen addresses to seed the record's raw IP/port fields. Addresses are
//! classified by scope and the most widely reachable one wins. Circuit-relay
//! and secure-websocket multiaddrs never seed the raw fields; they are
//! carried verbatim in the record's advertised multiaddr list instead.

use std::net::IpAddr;

use libp2p::Multiaddr;
use libp2p::multiaddr::Protocol;

use crate::error::RecordError;

/// Classification of an IP address by reachability scope.
///
/// Ordered from least to most widely reachable, so the maximum scope in a
/// candidate set is the one worth advertising.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AddressScope {
    /// Loopback addresses (127.0.0.0/8, ::1).
    Loopback,
    /// Private addresses (RFC 1918; RFC 4193 unique-local).
    Private,
    /// Everything else that is routable.
    External,
}

/// An IP endpoint extracted from a multiaddr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// The IP address component.
    pub ip: IpAddr,
    /// The TCP port component.
    pub port: u16,
}

/// Whether the address is in a private range (RFC 1918 / RFC 4193).
pub fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(v6) => v6.is_unique_local(),
    }
}

/// Whether the address is a loopback address.
pub fn is_loopback(ip: &IpAddr) -> bool {
    ip.is_loopback()
}

/// Whether the address is reachable from outside the local host and LAN:
/// not private, not loopback, not unspecified.
pub fn is_external(ip: &IpAddr) -> bool {
    !is_private(ip) && !is_loopback(ip) && !ip.is_unspecified()
}

/// Classify the scope of an IP address.
///
/// Returns `None` for unspecified addresses (0.0.0.0, ::), which are not
/// routable and never worth advertising.
pub fn classify_ip(ip: &IpAddr) -> Option<AddressScope> {
    if ip.is_unspecified() {
        None
    } else if is_loopback(ip) {
        Some(AddressScope::Loopback)
    } else if is_private(ip) {
        Some(AddressScope::Private)
    } else {
        Some(AddressScope::External)
    }
}

/// Extract the IP address from a multiaddr.
///
/// Returns `None` if the multiaddr doesn't contain an IP protocol.
pub fn extract_ip(addr: &Multiaddr) -> Option<IpAddr> {
    for proto in addr.iter() {
        match proto {
            Protocol::Ip4(ip) => return Some(IpAddr::V4(ip)),
            Protocol::Ip6(ip) => return Some(IpAddr::V6(ip)),
            _ => continue,
        }
    }
    None
}

/// Extract the IP/TCP endpoint from a multiaddr.
pub fn extract_endpoint(addr: &Multiaddr) -> Option<Endpoint> {
    let mut ip = None;
    let mut port = None;
    for proto in addr.iter() {
        match proto {
            Protocol::Ip4(v4) => ip = Some(IpAddr::V4(v4)),
            Protocol::Ip6(v6) => ip = Some(IpAddr::V6(v6)),
            Protocol::Tcp(p) => port = Some(p),
            _ => continue,
        }
    }
    match (ip, port) {
        (Some(ip), Some(port)) => Some(Endpoint { ip, port }),
        _ => None,
    }
}

/// Whether the multiaddr routes through a circuit relay.
pub fn is_circuit_addr(addr: &Multiaddr) -> bool {
    addr.iter().any(|p| matches!(p, Protocol::P2pCircuit))
}

/// Whether the multiaddr is wrapped in a secure websocket transport.
pub fn is_wss_addr(addr: &Multiaddr) -> bool {
    let mut saw_tls = false;
    for proto in addr.iter() {
        match proto {
            Protocol::Wss(_) => return true,
            Protocol::Tls => saw_tls = true,
            Protocol::Ws(_) if saw_tls => return true,
            _ => continue,
        }
    }
    false
}

/// Endpoints eligible to seed the record's raw IP/port fields.
///
/// Circuit-relay and secure-websocket multiaddrs are excluded; they cannot
/// describe a directly dialable endpoint and are advertised verbatim
/// instead.
pub fn selectable_endpoints(addrs: &[Multiaddr]) -> Vec<Endpoint> {
    addrs
        .iter()
        .filter(|addr| !is_circuit_addr(addr) && !is_wss_addr(addr))
        .filter_map(extract_endpoint)
        .collect()
}

/// Pick the most widely reachable endpoint out of a candidate set.
///
/// Preference order is external, then private, then loopback; within a
/// scope the first candidate in input order wins, so selection is
/// deterministic. Fails with [`RecordError::NoAddressAvailable`] when no
/// candidate classifies.
pub fn select_most_external(endpoints: &[Endpoint]) -> Result<Endpoint, RecordError> {
    for wanted in [
        AddressScope::External,
        AddressScope::Private,
        AddressScope::Loopback,
    ] {
        if let Some(endpoint) = endpoints
            .iter()
            .find(|e| classify_ip(&e.ip) == Some(wanted))
        {
            return Ok(*endpoint);
        }
    }
    Err(RecordError::NoAddressAvailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ma(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    fn ep(ip: &str, port: u16) -> Endpoint {
        Endpoint {
            ip: ip.parse().unwrap(),
            port,
        }
    }

    #[test]
    fn classify_loopback() {
        assert_eq!(
            classify_ip(&"127.0.0.1".parse().unwrap()),
            Some(AddressScope::Loopback)
        );
        assert_eq!(
            classify_ip(&"::1".parse().unwrap()),
            Some(AddressScope::Loopback)
        );
    }

    #[test]
    fn classify_private_ranges() {
        for ip in ["10.0.0.1", "172.16.0.1", "192.168.1.1"] {
            assert_eq!(
                classify_ip(&ip.parse().unwrap()),
                Some(AddressScope::Private),
                "{ip}"
            );
        }
        assert_eq!(
            classify_ip(&"fd00::1".parse().unwrap()),
            Some(AddressScope::Private)
        );
    }

    #[test]
    fn classify_external() {
        assert_eq!(
            classify_ip(&"8.8.8.8".parse().unwrap()),
            Some(AddressScope::External)
        );
        assert_eq!(
            classify_ip(&"2001:db8::1".parse().unwrap()),
            Some(AddressScope::External)
        );
        // Just outside the 172.16/12 private range.
        assert_eq!(
            classify_ip(&"172.32.0.1".parse().unwrap()),
            Some(AddressScope::External)
        );
    }

    #[test]
    fn classify_unspecified_is_none() {
        assert_eq!(classify_ip(&"0.0.0.0".parse().unwrap()), None);
        assert_eq!(classify_ip(&"::".parse().unwrap()), None);
        assert!(!is_external(&"0.0.0.0".parse().unwrap()));
    }

    #[test]
    fn extract_endpoint_from_multiaddr() {
        assert_eq!(
            extract_endpoint(&ma("/ip4/192.168.1.4/tcp/60000")),
            Some(ep("192.168.1.4", 60000))
        );
        assert_eq!(extract_endpoint(&ma("/dns4/example.com/tcp/443")), None);
        assert_eq!(extract_endpoint(&ma("/ip4/10.0.0.1/udp/9000")), None);
    }

    #[test]
    fn circuit_and_wss_detection() {
        let circuit = ma("/ip4/1.2.3.4/tcp/4001/p2p-circuit");
        assert!(is_circuit_addr(&circuit));
        assert!(!is_circuit_addr(&ma("/ip4/1.2.3.4/tcp/4001")));

        assert!(is_wss_addr(&ma("/ip4/1.2.3.4/tcp/443/wss")));
        assert!(is_wss_addr(&ma("/ip4/1.2.3.4/tcp/443/tls/ws")));
        assert!(!is_wss_addr(&ma("/ip4/1.2.3.4/tcp/80/ws")));
    }

    #[test]
    fn selectable_endpoints_skip_circuit_and_wss() {
        let addrs = vec![
            ma("/ip4/1.2.3.4/tcp/4001/p2p-circuit"),
            ma("/ip4/5.6.7.8/tcp/443/wss"),
            ma("/ip4/192.168.1.4/tcp/60000"),
        ];
        assert_eq!(selectable_endpoints(&addrs), vec![ep("192.168.1.4", 60000)]);
    }

    #[test]
    fn selection_prefers_external_over_private_over_loopback() {
        let endpoints = vec![
            ep("127.0.0.1", 1000),
            ep("192.168.1.4", 2000),
            ep("8.8.8.8", 3000),
        ];
        assert_eq!(
            select_most_external(&endpoints).unwrap(),
            ep("8.8.8.8", 3000)
        );

        let endpoints = vec![ep("127.0.0.1", 1000), ep("10.1.2.3", 2000)];
        assert_eq!(
            select_most_external(&endpoints).unwrap(),
            ep("10.1.2.3", 2000)
        );

        let endpoints = vec![ep("127.0.0.1", 1000)];
        assert_eq!(
            select_most_external(&endpoints).unwrap(),
            ep("127.0.0.1", 1000)
        );
    }

    #[test]
    fn selection_is_deterministic_within_a_scope() {
        let endpoints = vec![ep("8.8.8.8", 1), ep("1.1.1.1", 2)];
        assert_eq!(select_most_external(&endpoints).unwrap(), ep("8.8.8.8", 1));
    }

    #[test]
    fn selection_fails_on_empty_or_unroutable_input() {
        assert!(matches!(
            select_most_external(&[]),
            Err(RecordError::NoAddressAvailable)
        ));
        assert!(matches!(
            select_most_external(&[ep("0.0.0.0", 9000)]),
            Err(RecordError::NoAddressAvailable)
        ));
    }
}
