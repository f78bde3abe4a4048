//! valkey-cluster-router library
//!
//! Cluster-aware command routing for Valkey/Redis: slot hashing, a shared
//! topology cache, redirect handling and cross-node pipelining, plus a
//! client-side shard ring for deployments without a cluster bus.

pub mod client;
pub mod cluster;
pub mod config;
pub mod sharding;
pub mod utils;

pub use cluster::{cmd, ClusterClient, Command};
pub use config::{NodeAddress, ReadPreference, RouterConfig, ShardConfig};
pub use sharding::ShardedClient;
pub use utils::{RespValue, RouterError};
