//! Bounded per-node connection pool
//!
//! A pool owns every socket to one node. `borrow` hands out an idle
//! connection or opens a new one while fewer than `max_total` exist, and
//! otherwise waits up to `borrow_wait` for a return. The returned guard puts
//! the connection back on drop unless it was discarded or observed broken.
//! No lock is held while connecting or probing.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::command_channel::{CommandChannel, CommandChannelExt};
use super::raw_connection::{ConnectionFactory, RawConnection};
use crate::config::{NodeAddress, PoolConfig};
use crate::utils::{Result, RouterError};

struct PoolState {
    idle: Vec<RawConnection>,
    /// Idle plus borrowed plus being opened
    total: usize,
    closed: bool,
}

#[derive(Default)]
struct PoolCounters {
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub idle: usize,
    pub active: usize,
    pub created: u64,
    pub reused: u64,
    pub discarded: u64,
}

pub struct ConnectionPool {
    address: NodeAddress,
    factory: ConnectionFactory,
    config: PoolConfig,
    /// Replica pools switch every new connection to READONLY
    readonly: bool,
    state: Mutex<PoolState>,
    available: Condvar,
    counters: PoolCounters,
}

impl ConnectionPool {
    pub fn new(
        address: NodeAddress,
        factory: ConnectionFactory,
        config: PoolConfig,
        readonly: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            address,
            factory,
            config,
            readonly,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                total: 0,
                closed: false,
            }),
            available: Condvar::new(),
            counters: PoolCounters::default(),
        })
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Borrow a connection, waiting at most `borrow_wait` when the pool is full
    pub fn borrow(self: &Arc<Self>) -> Result<PooledConnection> {
        let wait = self.config.borrow_wait();
        let deadline = Instant::now() + wait;

        loop {
            let mut state = self.state.lock();
            if state.closed {
                return Err(RouterError::PoolClosed(self.address.clone()));
            }

            if let Some(conn) = state.idle.pop() {
                drop(state);
                match self.validate(conn) {
                    Some(conn) => {
                        self.counters.reused.fetch_add(1, Ordering::Relaxed);
                        return Ok(self.guard(conn));
                    }
                    None => continue,
                }
            }

            if state.total < self.config.max_total {
                state.total += 1;
                drop(state);
                return self.open();
            }

            if wait.is_zero() {
                return Err(RouterError::PoolExhausted {
                    node: self.address.clone(),
                    waited: wait,
                });
            }

            if self.available.wait_until(&mut state, deadline).timed_out()
                && state.idle.is_empty()
                && state.total >= self.config.max_total
            {
                return Err(RouterError::PoolExhausted {
                    node: self.address.clone(),
                    waited: wait,
                });
            }
        }
    }

    /// Open a new connection for a slot already reserved in `total`
    fn open(self: &Arc<Self>) -> Result<PooledConnection> {
        match self.factory.create(&self.address, self.readonly) {
            Ok(conn) => {
                self.counters.created.fetch_add(1, Ordering::Relaxed);
                Ok(self.guard(conn))
            }
            Err(e) => {
                self.release_slot();
                Err(e.into())
            }
        }
    }

    /// Liveness probe for idle connections when `test_on_borrow` is set
    fn validate(&self, mut conn: RawConnection) -> Option<RawConnection> {
        if !self.config.test_on_borrow {
            return Some(conn);
        }
        match conn.ping() {
            Ok(true) => Some(conn),
            _ => {
                debug!("Idle connection to {} failed validation", self.address);
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                self.release_slot();
                None
            }
        }
    }

    fn guard(self: &Arc<Self>, conn: RawConnection) -> PooledConnection {
        PooledConnection {
            pool: Arc::clone(self),
            conn: Some(conn),
        }
    }

    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.total = state.total.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }

    fn give_back(&self, conn: RawConnection) {
        let mut state = self.state.lock();
        if !conn.is_broken() && !state.closed && state.idle.len() < self.config.max_idle {
            state.idle.push(conn);
            drop(state);
        } else {
            state.total = state.total.saturating_sub(1);
            drop(state);
            if conn.is_broken() {
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.available.notify_one();
    }

    fn discard_conn(&self, conn: RawConnection) {
        drop(conn);
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        self.release_slot();
    }

    /// Drop idle connections and refuse further borrows; outstanding borrows
    /// are closed when they come back.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let idle = std::mem::take(&mut state.idle);
        state.total = state.total.saturating_sub(idle.len());
        drop(state);
        drop(idle);
        self.available.notify_all();
        debug!("Closed connection pool for {}", self.address);
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            idle: state.idle.len(),
            active: state.total - state.idle.len(),
            created: self.counters.created.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Borrowed connection; returned to its pool on drop
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    conn: Option<RawConnection>,
}

impl PooledConnection {
    /// Close the connection instead of returning it
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.discard_conn(conn);
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }
}

impl Deref for PooledConnection {
    type Target = RawConnection;

    fn deref(&self) -> &RawConnection {
        // only `discard` and `drop` take the connection, both consume the guard
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut RawConnection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn);
        }
    }
}
