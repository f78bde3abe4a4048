//! Consistent-hashing ring of virtual nodes
//!
//! Every shard owns `160 * weight` points on a signed 64-bit ring. A key
//! belongs to the first point at or after its hash, wrapping around to the
//! lowest point. Named shards derive their points from the name, so their
//! placement does not depend on list order.

use std::collections::BTreeMap;

use super::murmur::ring_hash;
use crate::cluster::slot::hash_tag;
use crate::config::{ShardConfig, ShardInfo};
use crate::utils::ConfigError;

/// Virtual nodes per unit of weight
pub const VIRTUAL_NODES_PER_WEIGHT: u32 = 160;

#[derive(Debug, Clone)]
pub struct ShardRing {
    shards: Vec<ShardInfo>,
    /// Sorted by position; later shards win position collisions
    points: Vec<(i64, usize)>,
    use_key_tags: bool,
}

impl ShardRing {
    pub fn new(shards: Vec<ShardInfo>, use_key_tags: bool) -> Result<Self, ConfigError> {
        if shards.is_empty() {
            return Err(ConfigError::Invalid("at least one shard is required".to_string()));
        }

        let mut ring = BTreeMap::new();
        for (index, shard) in shards.iter().enumerate() {
            if shard.weight == 0 {
                return Err(ConfigError::Invalid(format!(
                    "shard {} has weight 0",
                    shard.address
                )));
            }
            for n in 0..VIRTUAL_NODES_PER_WEIGHT * shard.weight {
                let point = match &shard.name {
                    Some(name) => format!("{}*{}", name, n),
                    None => format!("SHARD-{}-NODE-{}", index, n),
                };
                ring.insert(ring_hash(point.as_bytes()), index);
            }
        }

        Ok(Self {
            shards,
            points: ring.into_iter().collect(),
            use_key_tags,
        })
    }

    pub fn from_config(config: &ShardConfig) -> Result<Self, ConfigError> {
        Self::new(config.shards.clone(), config.use_key_tags)
    }

    pub fn shards(&self) -> &[ShardInfo] {
        &self.shards
    }

    /// Number of distinct points on the ring
    pub fn virtual_nodes(&self) -> usize {
        self.points.len()
    }

    /// Part of the key that is hashed
    pub fn routing_key<'k>(&self, key: &'k [u8]) -> &'k [u8] {
        if self.use_key_tags {
            hash_tag(key)
        } else {
            key
        }
    }

    /// Index of the shard owning `key`
    pub fn shard_index(&self, key: &[u8]) -> usize {
        let hash = ring_hash(self.routing_key(key));
        let pos = self.points.partition_point(|&(point, _)| point < hash);
        self.points[pos % self.points.len()].1
    }

    pub fn shard_for(&self, key: &[u8]) -> &ShardInfo {
        &self.shards[self.shard_index(key)]
    }
}
