//! Static-shard topic parsing and shard membership.

use std::collections::{BTreeSet, HashSet};

use tracing::trace;

use crate::error::RecordError;

/// Prefix of statically sharded gossip topics: `/murmur/2/rs/<cluster>/<index>`.
pub const SHARD_TOPIC_PREFIX: &str = "/murmur/2/rs/";

/// A parsed static-shard topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardTopic {
    /// The shard cluster the topic belongs to.
    pub cluster: u16,
    /// The shard index within the cluster.
    pub index: u16,
}

impl ShardTopic {
    /// Parse a topic name of the form `/murmur/2/rs/<cluster>/<index>`.
    ///
    /// Returns `None` for anything else (named topics are not part of the
    /// static sharding namespace).
    pub fn parse(topic: &str) -> Option<ShardTopic> {
        let rest = topic.strip_prefix(SHARD_TOPIC_PREFIX)?;
        let mut parts = rest.split('/');
        let cluster = parts.next()?.parse().ok()?;
        let index = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(ShardTopic { cluster, index })
    }
}

/// The node's shard membership within a single cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardList {
    /// The cluster every subscribed shard belongs to.
    pub cluster: u16,
    /// Subscribed shard indices, in stable order.
    pub indices: BTreeSet<u16>,
}

/// Compute the shard membership implied by the current topic set.
///
/// Topics outside the static sharding namespace are ignored. Returns
/// `Ok(None)` when no shard topics are subscribed. A topic set spanning
/// more than one cluster is a configuration error.
pub fn shards_from_topics<'a, I>(topics: I) -> Result<Option<ShardList>, RecordError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut clusters = HashSet::new();
    let mut indices = BTreeSet::new();

    for topic in topics {
        let Some(shard) = ShardTopic::parse(topic) else {
            trace!(topic, "topic outside sharding namespace, ignoring");
            continue;
        };
        clusters.insert(shard.cluster);
        indices.insert(shard.index);
    }

    if clusters.len() > 1 {
        return Err(RecordError::ShardClusterConflict(clusters.len()));
    }

    match clusters.into_iter().next() {
        Some(cluster) => Ok(Some(ShardList { cluster, indices })),
        None => Ok(None),
    }
}
