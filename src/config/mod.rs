//! Configuration module

pub mod cli;
pub mod pool_config;
pub mod router_config;
pub mod shard_config;

pub use cli::ProbeArgs;
pub use pool_config::PoolConfig;
pub use router_config::{AuthConfig, NodeAddress, ReadPreference, RouterConfig};
pub use shard_config::{ShardConfig, ShardInfo};
