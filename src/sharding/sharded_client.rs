//! Client for statically sharded deployments
//!
//! Commands go to the shard the ring picks for their keys, over that
//! shard's pool. There is no topology to discover and no redirect to follow.

use std::sync::Arc;

use tracing::info;

use super::ring::ShardRing;
use crate::client::{CommandChannelExt, ConnectionFactory, ConnectionPool, PoolStats};
use crate::cluster::Command;
use crate::config::{NodeAddress, ShardConfig, ShardInfo};
use crate::utils::{ConfigError, RespValue, Result, RouterError};

pub struct ShardedClient {
    ring: ShardRing,
    pools: Vec<Arc<ConnectionPool>>,
}

impl ShardedClient {
    /// Build the ring and one lazily connecting pool per shard
    pub fn new(config: &ShardConfig) -> Result<Self> {
        config.validate()?;
        let ring = ShardRing::from_config(config)?;
        let factory = ConnectionFactory::new(config.connect_timeout(), config.socket_timeout())
            .with_auth(config.auth.clone());

        let pools = ring
            .shards()
            .iter()
            .map(|shard| {
                ConnectionPool::new(
                    shard.address.clone(),
                    factory.clone(),
                    config.pool.clone(),
                    false,
                )
            })
            .collect();

        info!(
            "Shard ring ready: {} shards, {} virtual nodes",
            ring.shards().len(),
            ring.virtual_nodes()
        );
        Ok(Self { ring, pools })
    }

    pub fn ring(&self) -> &ShardRing {
        &self.ring
    }

    pub fn shard_for(&self, key: &[u8]) -> &ShardInfo {
        self.ring.shard_for(key)
    }

    /// Shard index for a command; every key must land on the same shard
    pub fn route(&self, command: &Command) -> Result<usize> {
        let mut shards = command.keys().iter().map(|k| self.ring.shard_index(k));
        let first = shards
            .next()
            .ok_or_else(|| RouterError::MissingKey(command.name()))?;
        match shards.find(|&s| s != first) {
            Some(other) => Err(RouterError::CrossShard { first, other }),
            None => Ok(first),
        }
    }

    pub fn execute(&self, command: &Command) -> Result<RespValue> {
        let shard = self.route(command)?;
        self.execute_on_shard(shard, command)
    }

    /// Run a command on one shard regardless of its keys
    pub fn execute_on_shard(&self, shard: usize, command: &Command) -> Result<RespValue> {
        let pool = self
            .pools
            .get(shard)
            .ok_or_else(|| ConfigError::Invalid(format!("no shard with index {}", shard)))?;
        let mut conn = pool.borrow()?;
        Ok(conn.execute(command.args())?)
    }

    pub fn pool_stats(&self) -> Vec<(NodeAddress, PoolStats)> {
        self.pools
            .iter()
            .map(|p| (p.address().clone(), p.stats()))
            .collect()
    }

    pub fn close(&self) {
        for pool in &self.pools {
            pool.close();
        }
    }
}

impl Drop for ShardedClient {
    fn drop(&mut self) {
        self.close();
    }
}
