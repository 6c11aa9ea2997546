//! Lifecycle seam for sub-protocol modules.
//!
//! The orchestrator treats relay, store, filter, push, and friends as
//! opaque lifecycle objects: they receive the host, start, and stop. They
//! are kept in a fixed-order list so later modules can depend on earlier
//! ones, and so the ordering is explicit and testable rather than
//! incidental.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::NodeError;
use crate::network::NetworkHost;

/// A sub-protocol module managed by the node lifecycle.
#[async_trait]
pub trait ProtocolModule: Send + Sync {
    /// Stable module name, used for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Hand the module its host. Called exactly once, before `start`.
    fn set_host(&mut self, host: Arc<dyn NetworkHost>);

    /// Start serving. A failure here aborts node startup.
    async fn start(&mut self) -> Result<(), NodeError>;

    /// Stop serving. Must not fail; called once during node shutdown.
    async fn stop(&mut self);
}
