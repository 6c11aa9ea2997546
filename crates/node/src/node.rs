//! Node lifecycle orchestration.
//!
//! [`Node`] wires the connectivity components into a running node: it
//! subscribes to host events, installs the connection notifier, launches
//! the background loops under a shared shutdown signal, and starts the
//! sub-protocol modules in a fixed order. `stop` tears everything down
//! deterministically and only returns once every background task has
//! exited.

use std::collections::HashSet;
use std::sync::Arc;

use libp2p::identity::Keypair;
use libp2p::{Multiaddr, PeerId};
use murmur_net_record::{
    LocalRecord, RecordUpdater, TopicEvent, UpdateOptions, watch_shard_subscriptions,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use crate::config::NodeConfig;
use crate::connectedness::{ConnStatus, ConnectionNotifier, PeerEvent, connection_status};
use crate::error::NodeError;
use crate::keepalive::KeepaliveMonitor;
use crate::network::{ListenAddressesChanged, NetworkHost, PeerIdentified, ProtocolsUpdated};
use crate::protocol::ProtocolModule;
use crate::relay_feed::{RelayDemand, RelaySource, run_relay_feeder};

/// Lifecycle states. Transitions are forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Capacity of the topic-membership event bus fed by the pubsub layer.
const TOPIC_EVENT_CAPACITY: usize = 64;

/// Capacity of the relay-candidate demand queue.
const RELAY_DEMAND_CAPACITY: usize = 4;

/// Builder for [`Node`].
pub struct NodeBuilder {
    config: NodeConfig,
    host: Arc<dyn NetworkHost>,
    keypair: Keypair,
    protocols: Vec<Box<dyn ProtocolModule>>,
    status_tx: Option<mpsc::Sender<ConnStatus>>,
    peer_events_tx: Option<mpsc::Sender<PeerEvent>>,
}

impl NodeBuilder {
    pub fn new(config: NodeConfig, host: Arc<dyn NetworkHost>, keypair: Keypair) -> Self {
        NodeBuilder {
            config,
            host,
            keypair,
            protocols: Vec::new(),
            status_tx: None,
            peer_events_tx: None,
        }
    }

    /// Append a sub-protocol module. Modules start in the order they are
    /// added and stop in that same order.
    pub fn with_protocol(mut self, module: Box<dyn ProtocolModule>) -> Self {
        self.protocols.push(module);
        self
    }

    /// Push aggregate connectivity status to this channel.
    pub fn with_status_channel(mut self, tx: mpsc::Sender<ConnStatus>) -> Self {
        self.status_tx = Some(tx);
        self
    }

    /// Forward per-peer connect/disconnect notifications to this channel,
    /// best effort.
    pub fn with_peer_events(mut self, tx: mpsc::Sender<PeerEvent>) -> Self {
        self.peer_events_tx = Some(tx);
        self
    }

    pub fn build(self) -> Result<Node, NodeError> {
        let updater = Arc::new(RecordUpdater::new(self.keypair)?);
        let (notifier, disconnect_rx) =
            ConnectionNotifier::new(self.host.peerstore(), self.peer_events_tx);
        let keepalive = Arc::new(KeepaliveMonitor::new(
            self.host.clone(),
            self.config.keepalive.clone(),
        ));
        let (topic_events_tx, _) = broadcast::channel(TOPIC_EVENT_CAPACITY);
        let (relay_demand_tx, relay_demand_rx) = mpsc::channel(RELAY_DEMAND_CAPACITY);

        Ok(Node {
            config: self.config,
            host: self.host,
            updater,
            notifier: Arc::new(notifier),
            keepalive,
            protocols: self.protocols,
            status_tx: self.status_tx,
            topic_events_tx,
            relay_demand_tx,
            relay_demand_rx: Some(relay_demand_rx),
            disconnect_rx: Some(disconnect_rx),
            state: NodeState::Created,
            shutdown_tx: None,
            tasks: JoinSet::new(),
        })
    }
}

/// A running node's connectivity core.
pub struct Node {
    config: NodeConfig,
    host: Arc<dyn NetworkHost>,
    updater: Arc<RecordUpdater>,
    notifier: Arc<ConnectionNotifier>,
    keepalive: Arc<KeepaliveMonitor>,
    protocols: Vec<Box<dyn ProtocolModule>>,
    status_tx: Option<mpsc::Sender<ConnStatus>>,
    topic_events_tx: broadcast::Sender<TopicEvent>,
    relay_demand_tx: mpsc::Sender<RelayDemand>,
    relay_demand_rx: Option<mpsc::Receiver<RelayDemand>>,
    disconnect_rx: Option<mpsc::Receiver<PeerId>>,
    state: NodeState,
    shutdown_tx: Option<watch::Sender<()>>,
    tasks: JoinSet<()>,
}

impl Node {
    pub fn builder(config: NodeConfig, host: Arc<dyn NetworkHost>, keypair: Keypair) -> NodeBuilder {
        NodeBuilder::new(config, host, keypair)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Subscribe to committed node record changes.
    pub fn record(&self) -> watch::Receiver<LocalRecord> {
        self.updater.subscribe()
    }

    /// Handle for the external auto-relay mechanism to request candidates.
    pub fn relay_source(&self) -> RelaySource {
        RelaySource::new(self.relay_demand_tx.clone())
    }

    /// Sender the pubsub layer uses to report topic membership changes.
    pub fn topic_events(&self) -> broadcast::Sender<TopicEvent> {
        self.topic_events_tx.clone()
    }

    /// Notifications dropped because the peer-event subscriber was full.
    pub fn dropped_peer_events(&self) -> u64 {
        self.notifier.dropped_peer_events()
    }

    /// Start the node.
    ///
    /// Binds the host, installs the connection observer, launches the
    /// background loops, and starts the sub-protocol modules in order.
    /// Any host or subscription failure aborts the start and the node must
    /// not be considered running; partially started state is not rolled
    /// back.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        if self.state != NodeState::Created {
            return Err(NodeError::InvalidState { state: self.state });
        }
        self.state = NodeState::Starting;
        info!(peer_id = %self.host.local_peer_id(), "starting node");

        self.host.start_listening().await?;

        let protocol_rx = self.host.subscribe_protocol_updates()?;
        let identified_rx = self.host.subscribe_identified()?;
        let status_addr_rx = self.host.subscribe_address_changes()?;
        let watcher_addr_rx = self.host.subscribe_address_changes()?;

        self.host.set_connection_observer(self.notifier.clone());

        // Seed the record from whatever we are already listening on. An
        // unusable address set is not fatal; the watcher retries on every
        // later change.
        let listen_addrs = self.host.listen_addresses();
        if let Err(error) = self
            .updater
            .update_addresses(&listen_addrs, &self.config.update_options())
        {
            warn!(%error, "could not seed address record from listen addresses");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let disconnect_rx = self
            .disconnect_rx
            .take()
            .ok_or(NodeError::InvalidState { state: self.state })?;
        let relay_demand_rx = self
            .relay_demand_rx
            .take()
            .ok_or(NodeError::InvalidState { state: self.state })?;

        self.tasks.spawn(run_connectivity_loop(
            self.host.clone(),
            self.status_tx.clone(),
            protocol_rx,
            identified_rx,
            status_addr_rx,
            disconnect_rx,
            shutdown_rx.clone(),
        ));
        self.tasks.spawn(run_address_watcher(
            self.host.clone(),
            self.updater.clone(),
            self.config.update_options(),
            watcher_addr_rx,
            shutdown_rx.clone(),
        ));
        self.tasks.spawn(run_record_logger(
            self.updater.subscribe(),
            shutdown_rx.clone(),
        ));
        self.tasks.spawn(watch_shard_subscriptions(
            self.updater.clone(),
            self.topic_events_tx.subscribe(),
            shutdown_rx.clone(),
        ));
        self.tasks.spawn(run_relay_feeder(
            self.host.peerstore(),
            relay_demand_rx,
            shutdown_rx.clone(),
        ));
        self.tasks.spawn(self.keepalive.clone().run(shutdown_rx));

        // Later modules may depend on earlier ones; the order is part of
        // the contract.
        for module in &mut self.protocols {
            module.set_host(self.host.clone());
            debug!(module = module.name(), "starting protocol module");
            module.start().await?;
        }

        self.shutdown_tx = Some(shutdown_tx);
        self.state = NodeState::Running;
        info!("node started");
        Ok(())
    }

    /// Stop the node.
    ///
    /// A no-op unless the node is running; safe to call before `start` or
    /// repeatedly. Returns once every background task has exited.
    pub async fn stop(&mut self) {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            debug!("stop called on a node that is not running");
            return;
        };
        self.state = NodeState::Stopping;
        info!("stopping node");

        // Wake every background task; the event subscriptions close as
        // their tasks exit.
        let _ = shutdown_tx.send(());

        self.host.clear_connection_observer();

        for module in &mut self.protocols {
            debug!(module = module.name(), "stopping protocol module");
            module.stop().await;
        }

        self.host.close().await;

        while self.tasks.join_next().await.is_some() {}

        self.state = NodeState::Stopped;
        info!("node stopped");
    }
}

/// Re-publish aggregate connectivity status whenever any subscription or
/// the disconnect channel fires.
async fn run_connectivity_loop(
    host: Arc<dyn NetworkHost>,
    status_tx: Option<mpsc::Sender<ConnStatus>>,
    mut protocol_rx: broadcast::Receiver<ProtocolsUpdated>,
    mut identified_rx: broadcast::Receiver<PeerIdentified>,
    mut addr_rx: broadcast::Receiver<ListenAddressesChanged>,
    mut disconnect_rx: mpsc::Receiver<PeerId>,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                debug!("connectivity loop stopping");
                break;
            }

            event = protocol_rx.recv() => {
                match event {
                    Ok(update) => trace!(peer_id = %update.peer_id, "peer protocols updated"),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "connectivity loop lagged on protocol updates");
                    }
                    Err(RecvError::Closed) => break,
                }
                publish_status(&host, &status_tx).await;
            }

            event = identified_rx.recv() => {
                match event {
                    Ok(identified) => trace!(peer_id = %identified.peer_id, "peer identified"),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "connectivity loop lagged on identification events");
                    }
                    Err(RecvError::Closed) => break,
                }
                publish_status(&host, &status_tx).await;
            }

            event = addr_rx.recv() => {
                match event {
                    Ok(_) => trace!("listen addresses changed"),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "connectivity loop lagged on address events");
                    }
                    Err(RecvError::Closed) => break,
                }
                publish_status(&host, &status_tx).await;
            }

            peer = disconnect_rx.recv() => {
                match peer {
                    Some(peer_id) => debug!(%peer_id, "peer disconnected"),
                    None => break,
                }
                publish_status(&host, &status_tx).await;
            }
        }
    }
}

async fn publish_status(host: &Arc<dyn NetworkHost>, status_tx: &Option<mpsc::Sender<ConnStatus>>) {
    let status = connection_status(host.as_ref());
    debug!(
        online = status.is_online,
        history = status.has_history,
        "connectivity changed"
    );
    if let Some(tx) = status_tx {
        if tx.send(status).await.is_err() {
            debug!("status subscriber gone");
        }
    }
}

/// Watch the listen address set and refresh the record on real changes.
///
/// Address events are compared as sets; spurious re-deliveries of the same
/// set trigger nothing.
async fn run_address_watcher(
    host: Arc<dyn NetworkHost>,
    updater: Arc<RecordUpdater>,
    options: UpdateOptions,
    mut addr_rx: broadcast::Receiver<ListenAddressesChanged>,
    mut shutdown: watch::Receiver<()>,
) {
    let mut known: HashSet<Multiaddr> = host.listen_addresses().into_iter().collect();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                debug!("address watcher stopping");
                break;
            }

            event = addr_rx.recv() => {
                let addresses = match event {
                    Ok(ListenAddressesChanged { addresses }) => addresses,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "address watcher lagged, resyncing from host");
                        host.listen_addresses()
                    }
                    Err(RecvError::Closed) => break,
                };

                let next: HashSet<Multiaddr> = addresses.iter().cloned().collect();
                if next == known {
                    trace!("listen addresses unchanged");
                    continue;
                }
                debug!(count = addresses.len(), "listen addresses changed, refreshing record");
                known = next;

                if let Err(error) = updater.update_addresses(&addresses, &options) {
                    warn!(%error, "address record refresh failed, keeping previous record");
                }
            }
        }
    }
}

/// Log every committed record change.
async fn run_record_logger(
    mut record_rx: watch::Receiver<LocalRecord>,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                debug!("record logger stopping");
                break;
            }

            changed = record_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let record = record_rx.borrow_and_update().clone();
                info!(
                    seq = record.seq(),
                    ip4 = ?record.ip4(),
                    ip6 = ?record.ip6(),
                    tcp = ?record.tcp(),
                    udp = ?record.udp(),
                    advertised = record.multiaddrs().len(),
                    "node record updated"
                );
            }
        }
    }
}
