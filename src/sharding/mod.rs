//! Client-side sharding for deployments without a cluster bus
//!
//! Independent of the cluster slot map: the ring is static and owned by the
//! client, nothing is discovered from the servers.

pub mod murmur;
pub mod ring;
pub mod sharded_client;

pub use murmur::{murmur64a, ring_hash};
pub use ring::ShardRing;
pub use sharded_client::ShardedClient;
