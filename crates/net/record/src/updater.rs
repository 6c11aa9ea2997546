//! The single writer that keeps the node record consistent with the
//! node's actual reachable addresses and shard subscriptions.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;

use libp2p::Multiaddr;
use libp2p::identity::Keypair;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace, warn};

use crate::classify::{
    Endpoint, is_circuit_addr, is_wss_addr, select_most_external, selectable_endpoints,
};
use crate::error::RecordError;
use crate::record::{Capabilities, LocalRecord};
use crate::shard::{ShardList, shards_from_topics};

/// Policy inputs for a record refresh.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Capability bits to advertise.
    pub capabilities: Capabilities,
    /// UDP discovery port, assigned verbatim.
    pub udp_port: Option<u16>,
    /// TCP port used in static mode.
    pub tcp_port: Option<u16>,
    /// Externally supplied endpoint address used in static mode.
    pub external_ip: Option<IpAddr>,
    /// When set, the record IP is derived from these addresses and
    /// automatic endpoint inference from the listen addresses is disabled.
    pub advertise_override: Option<Vec<Multiaddr>>,
    /// Whether the discovery subsystem may keep refreshing the endpoint
    /// fields on its own.
    pub auto_update: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        UpdateOptions {
            capabilities: Capabilities::none(),
            udp_port: None,
            tcp_port: None,
            external_ip: None,
            advertise_override: None,
            auto_update: true,
        }
    }
}

/// Gossip-topic membership changes observed from the pubsub layer.
#[derive(Debug, Clone)]
pub enum TopicEvent {
    /// The node subscribed to a topic.
    Joined(String),
    /// The node unsubscribed from a topic.
    Left(String),
}

/// Owns the [`LocalRecord`] and serializes every mutation to it.
///
/// Readers subscribe to a watch channel of record snapshots and treat
/// each snapshot as immutable.
pub struct RecordUpdater {
    record: Mutex<LocalRecord>,
    keypair: Keypair,
    tx: watch::Sender<LocalRecord>,
}

impl RecordUpdater {
    /// Create the updater together with a fresh, signed, empty record.
    pub fn new(keypair: Keypair) -> Result<Self, RecordError> {
        let record = LocalRecord::new(&keypair)?;
        let (tx, _rx) = watch::channel(record.clone());
        Ok(RecordUpdater {
            record: Mutex::new(record),
            keypair,
            tx,
        })
    }

    /// A snapshot of the current record.
    pub fn snapshot(&self) -> LocalRecord {
        self.record.lock().clone()
    }

    /// Subscribe to committed record changes.
    pub fn subscribe(&self) -> watch::Receiver<LocalRecord> {
        self.tx.subscribe()
    }

    /// Refresh the record's endpoint fields from the candidate addresses.
    ///
    /// Three policies, in precedence order:
    ///
    /// 1. An advertise override supplies the addresses the operator wants
    ///    published; the most external endpoint among them seeds the IP
    ///    and port fields.
    /// 2. With auto-update disabled, the explicitly configured address and
    ///    port are used verbatim.
    /// 3. Otherwise the most external endpoint of the candidate addresses
    ///    seeds the IP fields, clearing the address family that is not
    ///    present. In this mode the endpoint fields are written straight
    ///    onto the live record so the discovery subsystem retains
    ///    independent update rights over them.
    ///
    /// Every mode also refreshes the UDP port, the capability bits, and
    /// the advertised multiaddr list (circuit-relay addresses win over
    /// secure-websocket addresses; plain endpoints are already covered by
    /// the IP/port fields).
    ///
    /// On failure the record is left untouched and the previous version
    /// stays in effect.
    pub fn update_addresses(
        &self,
        candidates: &[Multiaddr],
        opts: &UpdateOptions,
    ) -> Result<(), RecordError> {
        let mut record = self.record.lock();

        if let Some(override_addrs) = &opts.advertise_override {
            let endpoint = select_most_external(&selectable_endpoints(override_addrs))?;
            let mut staged = record.clone();
            apply_endpoint(&mut staged, endpoint);
            apply_common(&mut staged, opts, advertised_multiaddrs(override_addrs));
            return self.commit(&mut record, staged);
        }

        let advertised = advertised_multiaddrs(candidates);

        if !opts.auto_update {
            let ip = opts.external_ip.ok_or(RecordError::NoAddressAvailable)?;
            let mut staged = record.clone();
            match ip {
                IpAddr::V4(v4) => {
                    staged.set_ip4(Some(v4));
                    staged.set_ip6(None);
                }
                IpAddr::V6(v6) => {
                    staged.set_ip6(Some(v6));
                    staged.set_ip4(None);
                }
            }
            if opts.tcp_port.is_some() {
                staged.set_tcp(opts.tcp_port);
            }
            apply_common(&mut staged, opts, advertised);
            return self.commit(&mut record, staged);
        }

        // Auto mode mutates the live record in place rather than staging a
        // copy; the endpoint is resolved first so a selection failure still
        // leaves the record untouched.
        let endpoint = select_most_external(&selectable_endpoints(candidates))?;
        let before = record.clone();
        apply_endpoint(&mut record, endpoint);
        apply_common(&mut record, opts, advertised);
        if record.content_eq(&before) {
            trace!("record content unchanged, skipping re-sign");
            return Ok(());
        }
        record.sign_and_bump(&self.keypair)?;
        self.publish(&record);
        Ok(())
    }

    /// Replace the record's shard membership.
    pub fn set_shards(&self, shards: Option<ShardList>) -> Result<(), RecordError> {
        let mut record = self.record.lock();
        if record.shards() == shards.as_ref() {
            return Ok(());
        }
        record.set_shards(shards);
        record.sign_and_bump(&self.keypair)?;
        self.publish(&record);
        Ok(())
    }

    fn commit(
        &self,
        record: &mut LocalRecord,
        staged: LocalRecord,
    ) -> Result<(), RecordError> {
        if record.content_eq(&staged) {
            trace!("record content unchanged, skipping re-sign");
            return Ok(());
        }
        *record = staged;
        record.sign_and_bump(&self.keypair)?;
        self.publish(record);
        Ok(())
    }

    fn publish(&self, record: &LocalRecord) {
        debug!(seq = record.seq(), "committed node record update");
        self.tx.send_replace(record.clone());
    }
}

/// Multiaddrs advertised verbatim alongside the raw endpoint fields.
///
/// A circuit-relay address signals the node is only reachable through a
/// relay, so direct dialing would fail; it takes priority over websocket
/// addresses when both exist.
fn advertised_multiaddrs(candidates: &[Multiaddr]) -> Vec<Multiaddr> {
    let circuit: Vec<Multiaddr> = candidates
        .iter()
        .filter(|a| is_circuit_addr(a))
        .cloned()
        .collect();
    if !circuit.is_empty() {
        return circuit;
    }
    candidates
        .iter()
        .filter(|a| is_wss_addr(a))
        .cloned()
        .collect()
}

fn apply_endpoint(record: &mut LocalRecord, endpoint: Endpoint) {
    match endpoint.ip {
        IpAddr::V4(v4) => {
            record.set_ip4(Some(v4));
            record.set_ip6(None);
        }
        IpAddr::V6(v6) => {
            record.set_ip6(Some(v6));
            record.set_ip4(None);
        }
    }
    record.set_tcp(Some(endpoint.port));
}

fn apply_common(record: &mut LocalRecord, opts: &UpdateOptions, advertised: Vec<Multiaddr>) {
    record.set_udp(opts.udp_port);
    record.set_capabilities(opts.capabilities);
    record.set_multiaddrs(advertised);
}

/// Track gossip-topic membership and push the implied shard list into the
/// record.
///
/// The topic set is maintained on both join and leave events, but the
/// record is only refreshed when a topic is joined; a leave becomes
/// visible at the next join. Shard topic sets spanning more than one
/// cluster are rejected and the update skipped.
pub async fn watch_shard_subscriptions(
    updater: Arc<RecordUpdater>,
    mut topic_events: broadcast::Receiver<TopicEvent>,
    mut shutdown: watch::Receiver<()>,
) {
    let mut topics: BTreeSet<String> = BTreeSet::new();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                debug!("shard subscription watcher stopping");
                break;
            }

            event = topic_events.recv() => match event {
                Ok(TopicEvent::Joined(topic)) => {
                    debug!(%topic, "joined topic");
                    topics.insert(topic);
                    match shards_from_topics(topics.iter().map(String::as_str)) {
                        Ok(shards) => {
                            if let Err(error) = updater.set_shards(shards) {
                                warn!(%error, "failed to refresh record shards");
                            }
                        }
                        Err(error) => {
                            warn!(%error, "inconsistent shard topics, skipping record update");
                        }
                    }
                }
                Ok(TopicEvent::Left(topic)) => {
                    debug!(%topic, "left topic");
                    topics.remove(&topic);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "shard watcher lagged on topic events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
