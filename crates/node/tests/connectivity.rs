//! End-to-end connectivity behavior through a running node.

use std::sync::Arc;
use std::time::Duration;

use libp2p::identity::Keypair;
use libp2p::{Multiaddr, PeerId};
use murmur_node::constants::{RELAY_HOP_PROTOCOL, RELAY_PROTOCOL, STORE_PROTOCOL};
use murmur_node::node::{Node, NodeState};
use murmur_node::record::TopicEvent;
use murmur_node::testing::{MemoryHost, PingOutcome};
use murmur_node::{Direction, NetworkHost, NodeConfig};
use tokio::sync::mpsc;

fn ma(s: &str) -> Multiaddr {
    s.parse().unwrap()
}

fn build(config: NodeConfig, host: Arc<MemoryHost>) -> Node {
    Node::builder(config, host, Keypair::generate_ed25519())
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn connectivity_events_publish_status() {
    let host = MemoryHost::new();
    let (status_tx, mut status_rx) = mpsc::channel(8);
    let mut node = Node::builder(
        NodeConfig::default(),
        host.clone(),
        Keypair::generate_ed25519(),
    )
    .with_status_channel(status_tx)
    .build()
    .unwrap();
    node.start().await.unwrap();

    let peer_id = PeerId::random();
    host.memory_peerstore()
        .add_peer(peer_id, vec![RELAY_PROTOCOL, STORE_PROTOCOL], vec![]);
    host.connect_peer(peer_id, Direction::Inbound).await;
    assert_eq!(
        host.memory_peerstore().direction(&peer_id),
        Some(Direction::Inbound)
    );

    host.emit_identified(peer_id);
    let status = status_rx.recv().await.unwrap();
    assert!(status.is_online);
    assert!(status.has_history);
    assert_eq!(status.peer_stats.get(&STORE_PROTOCOL), Some(&vec![peer_id]));

    host.disconnect_peer(peer_id).await;
    let status = status_rx.recv().await.unwrap();
    assert!(!status.is_online);
    assert!(!status.has_history);

    node.stop().await;
    assert_eq!(node.state(), NodeState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn address_change_triggers_exactly_one_record_refresh() {
    let host = MemoryHost::new();
    host.set_listen_addresses(vec![ma("/ip4/192.168.1.4/tcp/60000")]);

    let mut node = build(NodeConfig::default(), host.clone());
    node.start().await.unwrap();

    let mut record_rx = node.record();
    let seq_before = record_rx.borrow_and_update().seq();

    let grown = vec![
        ma("/ip4/192.168.1.4/tcp/60000"),
        ma("/ip4/8.8.8.8/tcp/60000"),
    ];
    host.emit_listen_addresses(grown.clone());
    record_rx.changed().await.unwrap();

    let record = record_rx.borrow_and_update().clone();
    assert_eq!(record.seq(), seq_before + 1);
    assert_eq!(record.ip4(), Some("8.8.8.8".parse().unwrap()));

    // Re-delivery of the identical set must not touch the record.
    host.emit_listen_addresses(grown);
    let waited = tokio::time::timeout(Duration::from_secs(1), record_rx.changed()).await;
    assert!(waited.is_err());

    node.stop().await;
}

#[tokio::test(start_paused = true)]
async fn keepalive_reclaims_dead_connection() {
    let host = MemoryHost::new();
    let mut config = NodeConfig::default();
    config.keepalive.interval = Duration::from_secs(10);

    let mut node = build(config, host.clone());
    node.start().await.unwrap();

    let peer_id = PeerId::random();
    host.connect_peer(peer_id, Direction::Outbound).await;
    host.set_default_ping(PingOutcome::Fail);

    // Three probe rounds fail; the third closes the connection.
    tokio::time::sleep(Duration::from_secs(35)).await;

    assert!(!host.is_connected(&peer_id));
    assert_eq!(host.closed_peers(), vec![peer_id]);

    node.stop().await;
}

#[tokio::test(start_paused = true)]
async fn relay_source_serves_candidates() {
    let host = MemoryHost::new();
    let relay_peer = PeerId::random();
    host.memory_peerstore().add_peer(
        relay_peer,
        vec![RELAY_HOP_PROTOCOL],
        vec![ma("/ip4/8.8.8.8/tcp/4001")],
    );
    host.memory_peerstore()
        .add_peer(PeerId::random(), vec![STORE_PROTOCOL], vec![]);

    let mut node = build(NodeConfig::default(), host);
    node.start().await.unwrap();

    let source = node.relay_source();
    let mut rx = source.request(2).await;

    let candidate = rx.recv().await.unwrap();
    assert_eq!(candidate.peer_id, relay_peer);
    assert!(rx.recv().await.is_none());

    node.stop().await;

    // After shutdown, requests yield an immediately closed channel.
    let mut rx = source.request(1).await;
    assert!(rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn joined_topics_flow_into_the_record() {
    let host = MemoryHost::new();
    let mut node = build(NodeConfig::default(), host);
    node.start().await.unwrap();

    let mut record_rx = node.record();
    record_rx.borrow_and_update();

    node.topic_events()
        .send(TopicEvent::Joined("/murmur/2/rs/1/3".into()))
        .unwrap();
    record_rx.changed().await.unwrap();

    let record = record_rx.borrow_and_update().clone();
    let shards = record.shards().unwrap();
    assert_eq!(shards.cluster, 1);
    assert!(shards.indices.contains(&3));

    node.stop().await;
}
