//! Cluster topology and command routing
//!
//! This module provides cluster support including:
//! - Slot mapping and CRC16 calculation
//! - Topology discovery via CLUSTER NODES
//! - Copy-on-write topology snapshots with collapsed refreshes
//! - Redirect handling for MOVED/ASK/TRYAGAIN/CLUSTERDOWN
//! - Read-from-replica strategies
//! - Cross-node pipelining

pub mod client;
pub mod command;
pub mod dispatcher;
pub mod node;
pub mod pipeline;
pub mod redirect;
pub mod slot;
pub mod topology;
pub mod topology_cache;

pub use client::{ClientStats, ClusterClient};
pub use command::{cmd, Command, Route};
pub use dispatcher::{DispatchStats, DispatchStatsSnapshot, Dispatcher};
pub use node::{ClusterNode, SlotMigration};
pub use pipeline::ClusterPipeline;
pub use redirect::RedirectSignal;
pub use slot::{hash_tag, slot_for_key, SLOT_COUNT};
pub use topology::ClusterTopology;
pub use topology_cache::{TopologyCache, TopologySnapshot};
