//! Node address record management.
//!
//! This crate maintains the node's self-describing, signed, versioned
//! address record: the structure advertised to the rest of the network so
//! that peers can find and dial us. It is split into:
//!
//! - [`classify`]: scope classification and endpoint selection over the
//!   node's multiaddrs
//! - [`record`]: the [`LocalRecord`] itself (endpoint fields, capability
//!   bitfield, advertised multiaddrs, shard membership)
//! - [`shard`]: static-shard topic parsing and shard list computation
//! - [`updater`]: the single writer that refreshes the record from the
//!   current listen addresses and shard subscriptions
//!
//! The record is mutated only through [`RecordUpdater`]; every other
//! component observes it through a watch channel of cloned snapshots.

pub mod classify;
mod error;
pub mod record;
pub mod shard;
pub mod updater;

pub use classify::{AddressScope, Endpoint};
pub use error::RecordError;
pub use record::{Capabilities, LocalRecord};
pub use shard::{ShardList, ShardTopic};
pub use updater::{RecordUpdater, TopicEvent, UpdateOptions, watch_shard_subscriptions};
