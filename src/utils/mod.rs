//! Utility modules

pub mod error;
#[cfg(test)]
pub(crate) mod mock_node;
pub mod resp;

pub use error::{ClusterError, ConfigError, ConnectionError, ProtocolError, Result, RouterError};
pub use resp::{RespDecoder, RespEncoder, RespValue};
