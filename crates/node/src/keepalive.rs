//! Periodic liveness probing of connected peers.
//!
//! Every tick the monitor pings each connected peer concurrently and
//! closes connections that miss too many probes in a row. An abnormally
//! large gap between ticks means the process was suspended; on that tick
//! every connection is presumed dead and dropped outright, without
//! probing and without touching failure counts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use libp2p::PeerId;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::metrics::KeepaliveMetrics;
use crate::network::NetworkHost;

/// Gap-to-interval ratio beyond which the process is assumed to have been
/// suspended.
const SLEEP_DETECTION_FACTOR: u32 = 3;

/// Keepalive tuning knobs.
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    /// Time between probe rounds.
    pub interval: Duration,
    /// Upper bound on a single probe round trip.
    pub ping_timeout: Duration,
    /// Consecutive failures tolerated before the connection is closed;
    /// the failure after this many is the one that disconnects.
    pub max_failures: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        KeepaliveConfig {
            interval: Duration::from_secs(5 * 60),
            ping_timeout: Duration::from_secs(7),
            max_failures: 2,
        }
    }
}

/// Probes connected peers and reclaims dead connections.
///
/// The consecutive-failure map is owned exclusively by this monitor; no
/// other component reads or writes it. Entries for peers that departed
/// for good are left in place.
pub struct KeepaliveMonitor {
    host: Arc<dyn NetworkHost>,
    config: KeepaliveConfig,
    failures: Mutex<HashMap<PeerId, u32>>,
    metrics: KeepaliveMetrics,
}

impl KeepaliveMonitor {
    pub fn new(host: Arc<dyn NetworkHost>, config: KeepaliveConfig) -> Self {
        KeepaliveMonitor {
            host,
            config,
            failures: Mutex::new(HashMap::new()),
            metrics: KeepaliveMetrics::default(),
        }
    }

    /// Consecutive failed probes recorded for a peer.
    pub fn failure_count(&self, peer_id: &PeerId) -> u32 {
        self.failures.lock().get(peer_id).copied().unwrap_or(0)
    }

    /// Run probe rounds until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<()>) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.interval,
            self.config.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_run = tokio::time::Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    debug!("keepalive monitor stopping");
                    break;
                }

                tick = ticker.tick() => {
                    let elapsed = tick.duration_since(last_run);
                    last_run = tick;
                    self.on_tick(elapsed).await;
                }
            }
        }
    }

    /// One scheduling round. `elapsed` is the time since the previous
    /// round actually ran.
    async fn on_tick(&self, elapsed: Duration) {
        if elapsed > self.config.interval * SLEEP_DETECTION_FACTOR {
            warn!(
                ?elapsed,
                "keepalive has not run recently, dropping all connections"
            );
            self.disconnect_all().await;
            return;
        }
        self.probe_connected_peers().await;
    }

    /// Force-disconnect every connected peer without probing. Used after a
    /// suspected process suspension, when every connection is presumed
    /// dead no matter its failure count.
    async fn disconnect_all(&self) {
        let local = self.host.local_peer_id();
        for peer_id in self.host.connected_peers() {
            if peer_id == local {
                continue;
            }
            self.metrics.forced_disconnects.increment(1);
            if let Err(error) = self.host.close_peer(&peer_id).await {
                debug!(%peer_id, %error, "failed to close connection");
            }
            if let Some(count) = self.failures.lock().get_mut(&peer_id) {
                *count = 0;
            }
        }
    }

    /// Probe every connected peer concurrently and wait for all probes to
    /// finish.
    async fn probe_connected_peers(&self) {
        let local = self.host.local_peer_id();
        let peers: Vec<PeerId> = self
            .host
            .connected_peers()
            .into_iter()
            .filter(|peer_id| *peer_id != local)
            .collect();

        if peers.is_empty() {
            trace!("no connected peers to probe");
            return;
        }

        trace!(count = peers.len(), "probing connected peers");
        futures::future::join_all(peers.into_iter().map(|peer_id| self.probe_peer(peer_id)))
            .await;
    }

    async fn probe_peer(&self, peer_id: PeerId) {
        self.metrics.pings.increment(1);

        let result =
            tokio::time::timeout(self.config.ping_timeout, self.host.ping(&peer_id)).await;
        match result {
            Ok(Ok(rtt)) => {
                trace!(%peer_id, ?rtt, "ping ok");
                self.failures.lock().insert(peer_id, 0);
                return;
            }
            Ok(Err(error)) => debug!(%peer_id, %error, "ping failed"),
            Err(_) => debug!(%peer_id, "ping timed out"),
        }

        self.metrics.ping_failures.increment(1);
        let consecutive = {
            let mut failures = self.failures.lock();
            let count = failures.entry(peer_id).or_insert(0);
            *count += 1;
            *count
        };

        // The peer may have disconnected while we were probing it; closing
        // an already-closed connection is harmless but skip the log noise.
        if consecutive > self.config.max_failures && self.host.is_connected(&peer_id) {
            info!(%peer_id, consecutive, "peer unresponsive, closing connection");
            self.metrics.forced_disconnects.increment(1);
            if let Err(error) = self.host.close_peer(&peer_id).await {
                debug!(%peer_id, %error, "failed to close connection");
            }
            self.failures.lock().insert(peer_id, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryHost, PingOutcome};

    fn monitor(host: Arc<MemoryHost>) -> KeepaliveMonitor {
        KeepaliveMonitor::new(
            host,
            KeepaliveConfig {
                interval: Duration::from_secs(10),
                ping_timeout: Duration::from_secs(7),
                max_failures: 2,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn three_consecutive_failures_close_the_connection() {
        let host = MemoryHost::new();
        let peer_id = PeerId::random();
        host.add_connected_peer(peer_id).await;
        host.set_default_ping(PingOutcome::Fail);

        let monitor = monitor(host.clone());

        monitor.probe_connected_peers().await;
        assert_eq!(monitor.failure_count(&peer_id), 1);
        assert!(host.is_connected(&peer_id));

        monitor.probe_connected_peers().await;
        assert_eq!(monitor.failure_count(&peer_id), 2);
        assert!(host.is_connected(&peer_id));

        monitor.probe_connected_peers().await;
        assert!(!host.is_connected(&peer_id));
        assert_eq!(host.closed_peers(), vec![peer_id]);
        assert_eq!(monitor.failure_count(&peer_id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_failure_count() {
        let host = MemoryHost::new();
        let peer_id = PeerId::random();
        host.add_connected_peer(peer_id).await;

        let monitor = monitor(host.clone());

        host.set_default_ping(PingOutcome::Fail);
        monitor.probe_connected_peers().await;
        monitor.probe_connected_peers().await;
        assert_eq!(monitor.failure_count(&peer_id), 2);

        host.set_default_ping(PingOutcome::Ok(Duration::from_millis(20)));
        monitor.probe_connected_peers().await;
        assert_eq!(monitor.failure_count(&peer_id), 0);
        assert!(host.is_connected(&peer_id));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_times_out_and_counts_as_failure() {
        let host = MemoryHost::new();
        let peer_id = PeerId::random();
        host.add_connected_peer(peer_id).await;
        host.set_default_ping(PingOutcome::Hang);

        let monitor = monitor(host.clone());
        monitor.probe_connected_peers().await;
        assert_eq!(monitor.failure_count(&peer_id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_gap_disconnects_everyone_without_probing() {
        let host = MemoryHost::new();
        let a = PeerId::random();
        let b = PeerId::random();
        host.add_connected_peer(a).await;
        host.add_connected_peer(b).await;
        host.set_default_ping(PingOutcome::Ok(Duration::from_millis(20)));

        let monitor = monitor(host.clone());

        // Gap larger than three intervals: both peers dropped, no pings
        // sent, no failures counted.
        monitor.on_tick(Duration::from_secs(31)).await;

        assert!(!host.is_connected(&a));
        assert!(!host.is_connected(&b));
        assert_eq!(host.ping_count(), 0);
        assert_eq!(monitor.failure_count(&a), 0);
        assert_eq!(monitor.failure_count(&b), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn normal_gap_probes_instead_of_disconnecting() {
        let host = MemoryHost::new();
        let peer_id = PeerId::random();
        host.add_connected_peer(peer_id).await;
        host.set_default_ping(PingOutcome::Ok(Duration::from_millis(20)));

        let monitor = monitor(host.clone());
        monitor.on_tick(Duration::from_secs(10)).await;

        assert!(host.is_connected(&peer_id));
        assert_eq!(host.ping_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_peer_is_not_closed_again() {
        let host = MemoryHost::new();
        let peer_id = PeerId::random();
        host.add_connected_peer(peer_id).await;
        host.set_default_ping(PingOutcome::Fail);

        let monitor = monitor(host.clone());
        monitor.probe_connected_peers().await;
        monitor.probe_connected_peers().await;

        // The peer disconnects on its own while the third probe is in
        // flight: the threshold is crossed but there is nothing to close.
        host.remove_connected_peer(&peer_id).await;
        monitor.probe_peer(peer_id).await;

        assert_eq!(monitor.failure_count(&peer_id), 3);
        assert!(host.closed_peers().is_empty());
    }
}
