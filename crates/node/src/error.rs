use murmur_net_record::RecordError;

use crate::network::HostError;
use crate::node::NodeState;

/// Fatal node errors. Steady-state failures (probe timeouts, metadata
/// write errors, unusable address sets) are absorbed and logged where they
/// occur; only startup failures cross this boundary.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The host layer failed during startup.
    #[error(transparent)]
    Host(#[from] HostError),

    /// The node record could not be created.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// A sub-protocol module failed to start.
    #[error("protocol module {name} failed to start: {reason}")]
    Protocol {
        /// The failing module.
        name: &'static str,
        /// Module-supplied failure detail.
        reason: String,
    },

    /// `start` was called on a node that already ran.
    #[error("node cannot start from state {state:?}")]
    InvalidState {
        /// The state the node was in.
        state: NodeState,
    },
}
