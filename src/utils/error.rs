//! Error types for the cluster router
//!
//! Routing failures are kept apart from ordinary server error replies:
//! a `-ERR ...` reply is a successful round-trip and comes back as
//! `Ok(RespValue::Error(..))`, never as one of these types.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::config::NodeAddress;
use crate::utils::RespValue;

/// Caller-facing routing error
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Connection pool for {node} exhausted after waiting {waited:?}")]
    PoolExhausted { node: NodeAddress, waited: Duration },

    #[error("Connection pool for {0} is closed")]
    PoolClosed(NodeAddress),

    #[error("No more cluster attempts left after {attempts} attempts{}", last_cause(.last))]
    MaxAttemptsExceeded {
        attempts: u32,
        last: Option<Box<RouterError>>,
    },

    #[error("Cluster retry deadline of {deadline:?} exceeded after {attempts} attempts")]
    RetryDeadlineExceeded { deadline: Duration, attempts: u32 },

    #[error("No reachable node in cluster")]
    NoReachableNode,

    #[error("Keys must belong to the same hash slot (got slots {first} and {other})")]
    CrossSlot { first: u16, other: u16 },

    #[error("Keys must belong to the same shard (got shards {first} and {other})")]
    CrossShard { first: usize, other: usize },

    #[error("{0} has no key to route by")]
    MissingKey(String),

    #[error("Broadcast replies differ across {} primaries", .replies.len())]
    Broadcast {
        replies: Vec<(NodeAddress, std::result::Result<RespValue, String>)>,
    },

    /// A pipeline sub-batch failed at the connection level; some of its
    /// commands may have been applied
    #[error("Pipeline batch to {node} aborted: {reason}")]
    BatchAborted { node: NodeAddress, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

fn last_cause(last: &Option<Box<RouterError>>) -> String {
    match last {
        Some(err) => format!(" (last error: {})", err),
        None => String::new(),
    }
}

impl RouterError {
    /// Whether this failure happened at the connection level and therefore
    /// counts against the attempt budget instead of surfacing immediately.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            RouterError::Connection(ConnectionError::AuthFailed(_)) => false,
            RouterError::Connection(_) | RouterError::PoolClosed(_) | RouterError::Protocol(_) => {
                true
            }
            _ => false,
        }
    }

    /// Credentials were rejected; no other node will accept them either
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, RouterError::Connection(ConnectionError::AuthFailed(_)))
    }
}

/// Connection-related errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to {address}: {source}")]
    ConnectFailed {
        address: NodeAddress,
        source: io::Error,
    },

    #[error("I/O error on connection to {address}: {source}")]
    Io {
        address: NodeAddress,
        source: io::Error,
    },

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("{address} rejected connection setup: {reply}")]
    Handshake { address: NodeAddress, reply: String },

    #[error("Connection to {0} closed unexpectedly")]
    Closed(NodeAddress),
}

impl ConnectionError {
    /// Wrap an I/O error observed on an established connection
    pub fn io(address: &NodeAddress, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            ConnectionError::Closed(address.clone())
        } else {
            ConnectionError::Io {
                address: address.clone(),
                source,
            }
        }
    }
}

/// RESP protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid RESP type byte: {0}")]
    InvalidType(u8),

    #[error("Invalid bulk string length: {0}")]
    InvalidLength(i64),

    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse { expected: String, actual: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Cluster topology errors
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Failed to parse CLUSTER NODES response: {0}")]
    ParseFailed(String),

    #[error("No primary nodes found in cluster")]
    NoPrimaries,

    #[error("Cluster slots have holes: {unassigned} of 16384 slots unassigned")]
    IncompleteCoverage { unassigned: usize },

    #[error("Slot {0} has no assigned node")]
    UnassignedSlot(u16),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid node address '{0}': expected host:port")]
    InvalidAddress(String),

    #[error("Failed to read configuration file: {0}")]
    Read(#[from] io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;
