//! Single-command routing with redirect handling
//!
//! Each call runs a bounded loop of attempts. An attempt resolves a target
//! from the snapshot loaded at its start, borrows a connection, sends the
//! command and classifies the reply:
//!
//! - plain reply (including application errors): returned as is
//! - `MOVED`: refresh the topology, next attempt goes to the named node
//! - `ASK`: `ASKING` plus the command to the named node within the same
//!   attempt, topology untouched
//! - `TRYAGAIN` / `CLUSTERDOWN`: jittered backoff, next attempt re-resolves
//! - connection failure: connection discarded, next attempt re-resolves;
//!   from the second consecutive failure on, refresh and back off
//!
//! The call fails with `MaxAttemptsExceeded` once `max_attempts` attempts
//! were made, or `RetryDeadlineExceeded` once `max_total_retries` elapsed.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::command::{Command, Route};
use super::redirect::RedirectSignal;
use super::topology_cache::{TopologyCache, TopologySnapshot};
use crate::client::{CommandChannelExt, ConnectionPool};
use crate::config::{NodeAddress, ReadPreference, RouterConfig};
use crate::utils::{RespValue, Result, RouterError};

/// Where the next attempt goes
enum NextHop {
    /// Resolve from the snapshot
    Resolve,
    /// Node named by the last `MOVED`
    Moved(NodeAddress),
    /// Node named by an `ASK` the asked node itself answered
    Ask(NodeAddress),
}

#[derive(Default)]
pub struct DispatchStats {
    moved: AtomicU64,
    ask: AtomicU64,
    try_again: AtomicU64,
    cluster_down: AtomicU64,
    connection_failures: AtomicU64,
    exhausted: AtomicU64,
}

/// Counters since the dispatcher was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStatsSnapshot {
    pub moved: u64,
    pub ask: u64,
    pub try_again: u64,
    pub cluster_down: u64,
    pub connection_failures: u64,
    /// Calls that ran out of attempts or time
    pub exhausted: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            moved: self.moved.load(Ordering::Relaxed),
            ask: self.ask.load(Ordering::Relaxed),
            try_again: self.try_again.load(Ordering::Relaxed),
            cluster_down: self.cluster_down.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Dispatcher {
    cache: Arc<TopologyCache>,
    max_attempts: u32,
    max_total_retries: Duration,
    read_preference: ReadPreference,
    round_robin: AtomicUsize,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(cache: Arc<TopologyCache>, config: &RouterConfig) -> Self {
        Self {
            cache,
            max_attempts: config.max_attempts.max(1),
            max_total_retries: config.max_total_retries(),
            read_preference: config.read_preference,
            round_robin: AtomicUsize::new(0),
            stats: DispatchStats::default(),
        }
    }

    pub fn cache(&self) -> &Arc<TopologyCache> {
        &self.cache
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Route one command, following redirects within the attempt budget
    pub fn execute(&self, command: &Command) -> Result<RespValue> {
        match command.route()? {
            Route::Slot(slot) => self.execute_for_slot(command, slot),
            Route::Keyless => self.execute_keyless(command),
        }
    }

    fn execute_for_slot(&self, command: &Command, slot: u16) -> Result<RespValue> {
        let deadline = Instant::now() + self.max_total_retries;
        let mut next = NextHop::Resolve;
        let mut consecutive_failures = 0u32;
        let mut last_error: Option<RouterError> = None;

        for attempt in 1..=self.max_attempts {
            self.check_deadline(attempt, deadline)?;
            let attempts_left = self.max_attempts - attempt;
            let snapshot = self.cache.snapshot();

            let (target, asking) = match std::mem::replace(&mut next, NextHop::Resolve) {
                NextHop::Resolve => match self.pick(&snapshot, slot, command.is_read_only()) {
                    Ok(target) => (target, false),
                    Err(e) => {
                        debug!("No owner for slot {} in generation {}", slot, snapshot.generation());
                        self.refresh_quietly(snapshot.generation());
                        last_error = Some(e);
                        continue;
                    }
                },
                NextHop::Moved(target) => (target, false),
                NextHop::Ask(target) => (target, true),
            };

            let mut outcome = self.send(&snapshot, &target, command, asking);

            // one ASK hop belongs to the attempt that received it
            let ask_hint = match &outcome {
                Ok(reply) if !asking => match RedirectSignal::classify(reply) {
                    RedirectSignal::Ask { target, .. } => Some(target),
                    _ => None,
                },
                _ => None,
            };
            if let Some(hint) = ask_hint {
                DispatchStats::bump(&self.stats.ask);
                debug!("{} slot {} asked to {}", command.name(), slot, hint);
                outcome = self.send(&snapshot, &hint, command, true);
            }

            let reply = match outcome {
                Ok(reply) => reply,
                Err(e) if e.is_connection_failure() => {
                    DispatchStats::bump(&self.stats.connection_failures);
                    consecutive_failures += 1;
                    debug!(
                        "Attempt {}/{} to {} failed: {}",
                        attempt, self.max_attempts, target, e
                    );
                    if consecutive_failures >= 2 && attempts_left > 0 {
                        if let Err(RouterError::NoReachableNode) =
                            self.cache.refresh_if_stale(snapshot.generation())
                        {
                            DispatchStats::bump(&self.stats.exhausted);
                            return Err(RouterError::NoReachableNode);
                        }
                        self.backoff(attempts_left, deadline);
                    }
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            consecutive_failures = 0;

            match RedirectSignal::classify(&reply) {
                RedirectSignal::None => return Ok(reply),
                RedirectSignal::Moved { target, .. } => {
                    DispatchStats::bump(&self.stats.moved);
                    debug!("{} slot {} moved to {}", command.name(), slot, target);
                    if attempts_left > 0 {
                        self.refresh_quietly(snapshot.generation());
                    }
                    next = NextHop::Moved(target);
                }
                RedirectSignal::Ask { target, .. } => {
                    DispatchStats::bump(&self.stats.ask);
                    next = NextHop::Ask(target);
                }
                RedirectSignal::TryAgain => {
                    DispatchStats::bump(&self.stats.try_again);
                    self.backoff(attempts_left, deadline);
                }
                RedirectSignal::ClusterDown => {
                    DispatchStats::bump(&self.stats.cluster_down);
                    self.backoff(attempts_left, deadline);
                }
            }
        }

        self.exhausted(command, last_error)
    }

    /// Keyless commands go round-robin; redirects just move on to the next node
    fn execute_keyless(&self, command: &Command) -> Result<RespValue> {
        let deadline = Instant::now() + self.max_total_retries;
        let mut last_error: Option<RouterError> = None;

        for attempt in 1..=self.max_attempts {
            self.check_deadline(attempt, deadline)?;
            let snapshot = self.cache.snapshot();
            let candidates =
                if command.is_read_only() && self.read_preference != ReadPreference::Primary {
                    snapshot.node_addresses()
                } else {
                    snapshot.primary_addresses()
                };
            if candidates.is_empty() {
                return Err(RouterError::NoReachableNode);
            }
            let target = candidates[self.round_robin.fetch_add(1, Ordering::Relaxed) % candidates.len()].clone();

            match self.send(&snapshot, &target, command, false) {
                Ok(reply) => {
                    let signal = RedirectSignal::classify(&reply);
                    if !signal.is_redirect() {
                        return Ok(reply);
                    }
                    debug!("Keyless {} redirected by {}: {:?}", command.name(), target, signal);
                    self.backoff(self.max_attempts - attempt, deadline);
                }
                Err(e) if e.is_connection_failure() => {
                    DispatchStats::bump(&self.stats.connection_failures);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        self.exhausted(command, last_error)
    }

    /// Send to every primary; succeed only if all replies agree
    pub fn broadcast(&self, command: &Command) -> Result<RespValue> {
        let snapshot = self.cache.snapshot();
        let primaries = snapshot.primary_addresses();
        if primaries.is_empty() {
            return Err(RouterError::NoReachableNode);
        }

        let replies: Vec<(NodeAddress, std::result::Result<RespValue, String>)> = primaries
            .into_iter()
            .map(|addr| {
                let reply = self
                    .send(&snapshot, addr, command, false)
                    .map_err(|e| e.to_string());
                (addr.clone(), reply)
            })
            .collect();

        let first = &replies[0].1;
        if first.is_ok() && replies.iter().all(|(_, r)| r == first) {
            if let Ok(reply) = first {
                return Ok(reply.clone());
            }
        }
        Err(RouterError::Broadcast { replies })
    }

    /// Run a command on one node with no redirect handling
    pub fn execute_on_node(&self, address: &NodeAddress, command: &Command) -> Result<RespValue> {
        let snapshot = self.cache.snapshot();
        self.send(&snapshot, address, command, false)
    }

    /// Target for a keyed command under the read preference
    pub(crate) fn pick(
        &self,
        snapshot: &TopologySnapshot,
        slot: u16,
        read_only: bool,
    ) -> Result<NodeAddress> {
        if read_only {
            snapshot.read_target(slot, self.read_preference).cloned()
        } else {
            snapshot.owner(slot).cloned()
        }
    }

    fn pool(&self, snapshot: &TopologySnapshot, target: &NodeAddress) -> Result<Arc<ConnectionPool>> {
        match snapshot.pool(target) {
            Some(pool) => Ok(Arc::clone(pool)),
            None => self.cache.pool_for(target),
        }
    }

    /// Write every command on one connection, then read as many replies.
    /// Replies are not classified; redirects come back as error values.
    pub(crate) fn send_batch(
        &self,
        snapshot: &TopologySnapshot,
        target: &NodeAddress,
        commands: &[&Command],
    ) -> Result<Vec<RespValue>> {
        let pool = self.pool(snapshot, target)?;
        let mut conn = pool.borrow()?;

        let args: Vec<&[Vec<u8>]> = commands.iter().map(|c| c.args()).collect();
        let outcome = conn.execute_pipeline::<_, Vec<u8>>(&args);
        if outcome.is_err() {
            DispatchStats::bump(&self.stats.connection_failures);
        }
        Ok(outcome?)
    }

    /// One command on a pooled connection, preceded by ASKING when asked
    fn send(
        &self,
        snapshot: &TopologySnapshot,
        target: &NodeAddress,
        command: &Command,
        asking: bool,
    ) -> Result<RespValue> {
        let pool = self.pool(snapshot, target)?;
        let mut conn = pool.borrow()?;

        if asking {
            conn.asking()?;
        }
        Ok(conn.execute(command.args())?)
    }

    fn check_deadline(&self, attempt: u32, deadline: Instant) -> Result<()> {
        if attempt > 1 && Instant::now() >= deadline {
            DispatchStats::bump(&self.stats.exhausted);
            warn!("Cluster retry deadline exceeded after {} attempts", attempt - 1);
            return Err(RouterError::RetryDeadlineExceeded {
                deadline: self.max_total_retries,
                attempts: attempt - 1,
            });
        }
        Ok(())
    }

    fn exhausted(&self, command: &Command, last: Option<RouterError>) -> Result<RespValue> {
        DispatchStats::bump(&self.stats.exhausted);
        warn!(
            "{} gave up after {} attempts",
            command.name(),
            self.max_attempts
        );
        Err(RouterError::MaxAttemptsExceeded {
            attempts: self.max_attempts,
            last: last.map(Box::new),
        })
    }

    fn refresh_quietly(&self, observed: u64) {
        if let Err(e) = self.cache.refresh_if_stale(observed) {
            warn!("Topology refresh failed: {}", e);
        }
    }

    /// Sleep a random time in `[0, remaining / attempts_left²]`
    fn backoff(&self, attempts_left: u32, deadline: Instant) {
        if attempts_left == 0 {
            return;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        let ceiling = remaining.as_millis() as u64 / (attempts_left as u64 * attempts_left as u64);
        let sleep = fastrand::u64(0..=ceiling);
        if sleep > 0 {
            thread::sleep(Duration::from_millis(sleep));
        }
    }
}
