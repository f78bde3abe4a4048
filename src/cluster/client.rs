//! Cluster client facade
//!
//! Ties the topology cache, the dispatcher and the optional background
//! refresher together behind one owned value.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use super::command::Command;
use super::dispatcher::{DispatchStatsSnapshot, Dispatcher};
use super::pipeline::ClusterPipeline;
use super::topology_cache::{TopologyCache, TopologySnapshot};
use crate::client::PoolStats;
use crate::config::{NodeAddress, RouterConfig};
use crate::utils::{RespValue, Result};

/// Aggregated counters for one client
#[derive(Debug, Clone)]
pub struct ClientStats {
    pub dispatch: DispatchStatsSnapshot,
    pub topology_refreshes: u64,
    pub generation: u64,
    pub pools: Vec<(NodeAddress, PoolStats)>,
}

/// Background thread refreshing the topology on a fixed period
struct Refresher {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Refresher {
    fn start(cache: Arc<TopologyCache>, period: Duration) -> Option<Self> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Arc::clone(&stop);

        let spawned = thread::Builder::new()
            .name("topology-refresher".to_string())
            .spawn(move || {
                let (stopped, wakeup) = &*signal;
                let mut guard = stopped.lock();
                loop {
                    wakeup.wait_for(&mut guard, period);
                    if *guard {
                        break;
                    }
                    // refresh without holding the stop lock
                    let refreshed = parking_lot::MutexGuard::unlocked(&mut guard, || cache.refresh());
                    match refreshed {
                        Ok(generation) => debug!("Periodic topology refresh: generation {}", generation),
                        Err(e) => warn!("Periodic topology refresh failed: {}", e),
                    }
                    if *guard {
                        break;
                    }
                }
            });

        match spawned {
            Ok(handle) => Some(Self {
                stop,
                handle: Some(handle),
            }),
            Err(e) => {
                warn!("Failed to spawn topology refresher: {}", e);
                None
            }
        }
    }

    fn stop(&mut self) {
        let (stopped, wakeup) = &*self.stop;
        *stopped.lock() = true;
        wakeup.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub struct ClusterClient {
    dispatcher: Dispatcher,
    refresher: Mutex<Option<Refresher>>,
}

impl ClusterClient {
    /// Discover the cluster and start the periodic refresher if configured
    pub fn connect(config: &RouterConfig) -> Result<Self> {
        let cache = Arc::new(TopologyCache::connect(config)?);
        let snapshot = cache.snapshot();
        info!(
            "Connected to cluster: {} primaries, {} nodes",
            snapshot.topology().num_primaries(),
            snapshot.topology().num_nodes()
        );

        let refresher = config
            .topology_refresh_period()
            .and_then(|period| Refresher::start(Arc::clone(&cache), period));

        Ok(Self {
            dispatcher: Dispatcher::new(cache, config),
            refresher: Mutex::new(refresher),
        })
    }

    pub fn execute(&self, command: &Command) -> Result<RespValue> {
        self.dispatcher.execute(command)
    }

    pub fn pipeline(&self) -> ClusterPipeline<'_> {
        ClusterPipeline::new(&self.dispatcher)
    }

    pub fn broadcast(&self, command: &Command) -> Result<RespValue> {
        self.dispatcher.broadcast(command)
    }

    pub fn execute_on_node(&self, address: &NodeAddress, command: &Command) -> Result<RespValue> {
        self.dispatcher.execute_on_node(address, command)
    }

    pub fn cache(&self) -> &Arc<TopologyCache> {
        self.dispatcher.cache()
    }

    /// Current topology snapshot
    pub fn topology(&self) -> Arc<TopologySnapshot> {
        self.dispatcher.cache().snapshot()
    }

    pub fn refresh(&self) -> Result<u64> {
        self.dispatcher.cache().refresh()
    }

    pub fn stats(&self) -> ClientStats {
        let cache = self.dispatcher.cache();
        let snapshot = cache.snapshot();
        let pools = snapshot
            .node_addresses()
            .into_iter()
            .filter_map(|addr| snapshot.pool(addr).map(|p| (addr.clone(), p.stats())))
            .collect();
        ClientStats {
            dispatch: self.dispatcher.stats(),
            topology_refreshes: cache.refresh_count(),
            generation: snapshot.generation(),
            pools,
        }
    }

    /// Stop the refresher and close every pool
    pub fn close(&self) {
        if let Some(mut refresher) = self.refresher.lock().take() {
            refresher.stop();
        }
        self.dispatcher.cache().close();
    }
}

impl Drop for ClusterClient {
    fn drop(&mut self) {
        self.close();
    }
}
