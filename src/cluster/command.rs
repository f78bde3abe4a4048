//! Routable command builder
//!
//! A command is its raw arguments plus routing metadata: which arguments
//! are keys, an optional forced slot, and whether it may be served by a
//! replica.

use super::slot::{slot_for_key, SLOT_COUNT};
use crate::utils::{ConfigError, Result, RouterError};

/// Commands treated as read-only unless overridden with [`Command::read_only`]
const READ_ONLY_COMMANDS: &[&str] = &[
    "BITCOUNT", "BITPOS", "DBSIZE", "DUMP", "ECHO", "EXISTS", "GEODIST", "GEOHASH", "GEOPOS",
    "GEOSEARCH", "GET", "GETBIT", "GETRANGE", "HEXISTS", "HGET", "HGETALL", "HKEYS", "HLEN",
    "HMGET", "HSCAN", "HSTRLEN", "HVALS", "KEYS", "LINDEX", "LLEN", "LPOS", "LRANGE", "MGET",
    "PFCOUNT", "PING", "PTTL", "RANDOMKEY", "SCAN", "SCARD", "SDIFF", "SINTER", "SISMEMBER",
    "SMEMBERS", "SMISMEMBER", "SRANDMEMBER", "SSCAN", "STRLEN", "SUNION", "TTL", "TYPE",
    "XLEN", "XRANGE", "XREAD", "XREVRANGE", "ZCARD", "ZCOUNT", "ZLEXCOUNT", "ZMSCORE", "ZRANGE",
    "ZRANGEBYLEX", "ZRANGEBYSCORE", "ZRANK", "ZREVRANGE", "ZREVRANGEBYLEX", "ZREVRANGEBYSCORE",
    "ZREVRANK", "ZSCAN", "ZSCORE",
];

fn is_read_only_name(name: &[u8]) -> bool {
    READ_ONLY_COMMANDS
        .iter()
        .any(|c| c.as_bytes().eq_ignore_ascii_case(name))
}

/// Where a command must be sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Owner (or a replica, for reads) of this slot
    Slot(u16),
    /// No key: any primary will do
    Keyless,
}

/// A command with routing metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Vec<u8>>,
    keys: Vec<Vec<u8>>,
    slot_override: Option<u16>,
    read_only: bool,
}

/// Start building a command
pub fn cmd(name: impl AsRef<[u8]>) -> Command {
    Command::new(name)
}

impl Command {
    pub fn new(name: impl AsRef<[u8]>) -> Self {
        let name = name.as_ref();
        Self {
            args: vec![name.to_vec()],
            keys: Vec::new(),
            slot_override: None,
            read_only: is_read_only_name(name),
        }
    }

    /// Append a plain argument
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(arg.as_ref().to_vec());
        self
    }

    /// Append a key argument; it takes part in routing
    pub fn key(mut self, key: impl AsRef<[u8]>) -> Self {
        let key = key.as_ref().to_vec();
        self.args.push(key.clone());
        self.keys.push(key);
        self
    }

    /// Route by this key without sending it as an argument
    pub fn routing_key(mut self, key: impl AsRef<[u8]>) -> Self {
        self.keys.push(key.as_ref().to_vec());
        self
    }

    /// Force the slot, ignoring keys
    pub fn slot(mut self, slot: u16) -> Self {
        self.slot_override = Some(slot);
        self
    }

    /// Mark as safe (or unsafe) to serve from a replica
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    pub fn keys(&self) -> &[Vec<u8>] {
        &self.keys
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Command name for logs
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).to_ascii_uppercase()
    }

    /// Resolve the route; every key must hash to the same slot
    pub fn route(&self) -> Result<Route> {
        if let Some(slot) = self.slot_override {
            if slot as usize >= SLOT_COUNT {
                return Err(ConfigError::Invalid(format!(
                    "slot {} out of range 0..{}",
                    slot, SLOT_COUNT
                ))
                .into());
            }
            return Ok(Route::Slot(slot));
        }

        let mut slots = self.keys.iter().map(|k| slot_for_key(k));
        let Some(first) = slots.next() else {
            return Ok(Route::Keyless);
        };
        match slots.find(|&s| s != first) {
            Some(other) => Err(RouterError::CrossSlot { first, other }),
            None => Ok(Route::Slot(first)),
        }
    }
}
