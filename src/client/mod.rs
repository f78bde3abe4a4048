//! Client connection layer

pub mod command_channel;
pub mod pool;
pub mod raw_connection;

pub use command_channel::{CommandChannel, CommandChannelExt};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use raw_connection::{ConnectionFactory, RawConnection};
