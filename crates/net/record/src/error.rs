use libp2p::identity::SigningError;

/// Errors produced while building or refreshing the node record.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// None of the candidate addresses yielded a usable IP endpoint.
    #[error("no suitable address available")]
    NoAddressAvailable,

    /// The subscribed shard topics span more than one cluster.
    #[error("shard topics span {0} clusters, expected exactly one")]
    ShardClusterConflict(usize),

    /// The record could not be re-signed after a mutation.
    #[error("record signing failed: {0}")]
    Signing(#[from] SigningError),
}
