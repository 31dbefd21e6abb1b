//! Persistent allocation state for the wire agent.
//!
//! This module provides SQLite-based storage for:
//! - The link pool (tunnel links carved from the configured address block)
//! - Port attributes (where a leased port lands on a device)
//!
//! Both survive agent restarts; leases are only ever changed through the
//! operations here.

mod attributes;
mod links;
mod store;

pub use attributes::{PortAttributeStore, PortAttributes};
pub use links::{Link, LinkPool, PoolStats, PortEndpoint, Side};
pub use store::{StateStore, StateStoreError};
