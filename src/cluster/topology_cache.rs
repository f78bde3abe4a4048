//! Shared, refreshable cluster topology
//!
//! The cache publishes immutable [`TopologySnapshot`]s through an
//! `ArcSwap`: readers load the current snapshot without locking and keep
//! using it for the rest of their call, even if a refresh publishes a newer
//! one meanwhile. Refreshes are serialized by a mutex and collapsed by
//! generation, so a burst of callers that all observed the same stale
//! snapshot causes a single CLUSTER NODES round-trip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::topology::ClusterTopology;
use crate::client::{CommandChannelExt, ConnectionFactory, ConnectionPool};
use crate::config::{NodeAddress, PoolConfig, ReadPreference, RouterConfig};
use crate::utils::{ClusterError, Result, RouterError};

/// Point-in-time slot map plus the pools of every node it lists
pub struct TopologySnapshot {
    topology: ClusterTopology,
    pools: HashMap<NodeAddress, Arc<ConnectionPool>>,
    generation: u64,
}

impl TopologySnapshot {
    pub fn topology(&self) -> &ClusterTopology {
        &self.topology
    }

    /// Monotonically increasing publication counter
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Primary owning `slot`
    pub fn owner(&self, slot: u16) -> Result<&NodeAddress> {
        self.topology
            .owner_address(slot)
            .ok_or_else(|| ClusterError::UnassignedSlot(slot).into())
    }

    /// Node to read `slot` from under the given preference
    pub fn read_target(&self, slot: u16, preference: ReadPreference) -> Result<&NodeAddress> {
        let owner = self
            .topology
            .owner(slot)
            .ok_or(ClusterError::UnassignedSlot(slot))?;

        if preference == ReadPreference::Primary {
            return Ok(&owner.address);
        }

        let replicas: Vec<&NodeAddress> = self
            .topology
            .replicas_of(&owner.id)
            .into_iter()
            .filter(|n| n.is_available())
            .map(|n| &n.address)
            .collect();

        Ok(match preference {
            ReadPreference::Replica if !replicas.is_empty() => {
                replicas[fastrand::usize(..replicas.len())]
            }
            ReadPreference::Any => {
                let pick = fastrand::usize(..=replicas.len());
                replicas.get(pick).copied().unwrap_or(&owner.address)
            }
            _ => &owner.address,
        })
    }

    pub fn pool(&self, address: &NodeAddress) -> Option<&Arc<ConnectionPool>> {
        self.pools.get(address)
    }

    /// Available primaries, in topology order
    pub fn primary_addresses(&self) -> Vec<&NodeAddress> {
        self.topology
            .primaries()
            .filter(|n| n.is_available())
            .map(|n| &n.address)
            .collect()
    }

    /// Available nodes of any role, in topology order
    pub fn node_addresses(&self) -> Vec<&NodeAddress> {
        self.topology
            .nodes()
            .iter()
            .filter(|n| n.is_available())
            .map(|n| &n.address)
            .collect()
    }
}

/// Owner of the current snapshot and of every node pool
pub struct TopologyCache {
    seeds: Vec<NodeAddress>,
    require_full_coverage: bool,
    pool_config: PoolConfig,
    factory: ConnectionFactory,
    current: ArcSwap<TopologySnapshot>,
    /// Serializes refreshes; never held by readers
    refresh_lock: Mutex<()>,
    /// Pools for redirect targets the snapshot does not list yet
    detached: Mutex<HashMap<NodeAddress, Arc<ConnectionPool>>>,
    refreshes: AtomicU64,
    closed: AtomicBool,
}

impl TopologyCache {
    /// Discover the cluster from the configured seeds
    pub fn connect(config: &RouterConfig) -> Result<Self> {
        config.validate()?;

        let factory = ConnectionFactory::new(config.connect_timeout(), config.socket_timeout())
            .with_auth(config.auth.clone());

        let cache = Self {
            seeds: config.seeds.clone(),
            require_full_coverage: config.require_full_coverage,
            pool_config: config.pool.clone(),
            factory,
            current: ArcSwap::from_pointee(TopologySnapshot {
                topology: ClusterTopology::empty(),
                pools: HashMap::new(),
                generation: 0,
            }),
            refresh_lock: Mutex::new(()),
            detached: Mutex::new(HashMap::new()),
            refreshes: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        };

        cache.refresh_if_stale(0)?;
        Ok(cache)
    }

    /// Current snapshot; stays valid for as long as the caller holds it
    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    /// Topologies published, discovery included (collapsed requests not counted)
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Owner of `slot` in the current snapshot
    pub fn resolve(&self, slot: u16) -> Result<NodeAddress> {
        self.current.load().owner(slot).cloned()
    }

    /// Read target for `slot` in the current snapshot
    pub fn resolve_for_read(&self, slot: u16, preference: ReadPreference) -> Result<NodeAddress> {
        self.current.load().read_target(slot, preference).cloned()
    }

    /// Force a refresh unless one is published while waiting for the lock
    pub fn refresh(&self) -> Result<u64> {
        let observed = self.generation();
        self.refresh_if_stale(observed)
    }

    /// Refresh only if the published generation is still `observed`.
    ///
    /// Returns the generation current after the call.
    pub fn refresh_if_stale(&self, observed: u64) -> Result<u64> {
        let _guard = self.refresh_lock.lock();

        if self.closed.load(Ordering::Acquire) {
            return Err(RouterError::NoReachableNode);
        }

        let current = self.current.load_full();
        if current.generation > observed {
            debug!(
                "Topology refresh collapsed: generation {} already newer than {}",
                current.generation, observed
            );
            return Ok(current.generation);
        }

        let mut last_error: Option<RouterError> = None;
        for address in self.candidates(&current) {
            match self.fetch_topology(&address) {
                Ok(topology) => {
                    let generation = self.publish(&current, topology);
                    return Ok(generation);
                }
                Err(e) if e.is_auth_failure() => {
                    warn!("{} rejected credentials: {}", address, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Failed to fetch topology from {}: {}", address, e);
                    if !e.is_connection_failure() {
                        last_error = Some(e);
                    }
                }
            }
        }

        warn!("Failed to refresh cluster topology from any node");
        Err(last_error.unwrap_or(RouterError::NoReachableNode))
    }

    /// Seeds in random order, then every other node the snapshot knows
    fn candidates(&self, current: &TopologySnapshot) -> Vec<NodeAddress> {
        let mut candidates = self.seeds.clone();
        fastrand::shuffle(&mut candidates);

        let known = current
            .topology
            .primaries()
            .chain(current.topology.nodes().iter().filter(|n| n.is_replica()))
            .map(|n| &n.address);
        for address in known {
            if !candidates.contains(address) {
                candidates.push(address.clone());
            }
        }
        candidates
    }

    /// Fetch topology from a specific node over a dedicated connection
    fn fetch_topology(&self, address: &NodeAddress) -> Result<ClusterTopology> {
        let mut conn = self.factory.create(address, false)?;
        let response = conn.cluster_nodes()?;
        let topology = ClusterTopology::from_cluster_nodes(&response, Some(address))?;
        if self.require_full_coverage {
            topology.check_coverage()?;
        }
        Ok(topology)
    }

    /// Build the next snapshot off to the side and swap it in
    fn publish(&self, current: &TopologySnapshot, topology: ClusterTopology) -> u64 {
        let mut detached = self.detached.lock();
        let mut pools = HashMap::with_capacity(topology.num_nodes());

        for node in topology.nodes() {
            let readonly = node.is_replica();
            let reusable = |pool: &Arc<ConnectionPool>| {
                pool.is_readonly() == readonly && !pool.is_closed()
            };
            let pool = match current.pools.get(&node.address) {
                Some(pool) if reusable(pool) => Arc::clone(pool),
                _ => match detached.remove(&node.address) {
                    Some(pool) if reusable(&pool) => pool,
                    stale => {
                        if let Some(stale) = stale {
                            stale.close();
                        }
                        ConnectionPool::new(
                            node.address.clone(),
                            self.factory.clone(),
                            self.pool_config.clone(),
                            readonly,
                        )
                    }
                },
            };
            pools.insert(node.address.clone(), pool);
        }

        // pools the new snapshot no longer references
        for (address, pool) in &current.pools {
            if !pools.get(address).is_some_and(|p| Arc::ptr_eq(p, pool)) {
                pool.close();
            }
        }
        for (_, pool) in detached.drain() {
            pool.close();
        }
        drop(detached);

        let generation = current.generation + 1;
        info!(
            "Cluster topology refreshed (generation {}): {} primaries, {} total nodes",
            generation,
            topology.num_primaries(),
            topology.num_nodes()
        );

        self.current.store(Arc::new(TopologySnapshot {
            topology,
            pools,
            generation,
        }));
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        generation
    }

    /// Pool for `address`: the snapshot's, or a detached one for nodes the
    /// snapshot does not list yet (redirect targets).
    pub fn pool_for(&self, address: &NodeAddress) -> Result<Arc<ConnectionPool>> {
        if let Some(pool) = self.current.load().pool(address) {
            return Ok(Arc::clone(pool));
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(RouterError::PoolClosed(address.clone()));
        }

        let mut detached = self.detached.lock();
        let pool = detached.entry(address.clone()).or_insert_with(|| {
            debug!("Opening detached pool for redirect target {}", address);
            ConnectionPool::new(
                address.clone(),
                self.factory.clone(),
                self.pool_config.clone(),
                false,
            )
        });
        Ok(Arc::clone(pool))
    }

    /// Close every pool; later refreshes fail
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _guard = self.refresh_lock.lock();
        for pool in self.current.load().pools.values() {
            pool.close();
        }
        for (_, pool) in self.detached.lock().drain() {
            pool.close();
        }
        info!("Topology cache closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
