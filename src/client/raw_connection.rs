//! Raw TCP connection to one node
//!
//! Writes go through a buffered writer and are flushed once per batch;
//! replies are decoded in order from a buffered reader over a clone of
//! the same socket. Any I/O or framing failure marks the connection
//! broken so that its pool discards it instead of reusing it.

use std::io::{self, BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use super::command_channel::{CommandChannel, CommandChannelExt};
use crate::config::{AuthConfig, NodeAddress};
use crate::utils::{ConnectionError, RespDecoder, RespValue};

/// Single TCP connection speaking RESP
pub struct RawConnection {
    address: NodeAddress,
    writer: BufWriter<TcpStream>,
    decoder: RespDecoder<BufReader<TcpStream>>,
    broken: bool,
}

impl RawConnection {
    /// Open a TCP connection with the given connect and socket timeouts
    pub fn connect(
        address: &NodeAddress,
        connect_timeout: Duration,
        socket_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let connect_err = |source: io::Error| ConnectionError::ConnectFailed {
            address: address.clone(),
            source,
        };

        let addr = (address.host.as_str(), address.port)
            .to_socket_addrs()
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| {
                connect_err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "No addresses found",
                ))
            })?;

        let stream = TcpStream::connect_timeout(&addr, connect_timeout).map_err(connect_err)?;

        stream.set_nodelay(true).ok();
        let timeout = (!socket_timeout.is_zero()).then_some(socket_timeout);
        stream.set_read_timeout(timeout).map_err(connect_err)?;
        stream.set_write_timeout(timeout).map_err(connect_err)?;

        let writer = BufWriter::with_capacity(16 * 1024, stream.try_clone().map_err(connect_err)?);
        let reader = BufReader::with_capacity(16 * 1024, stream);

        debug!("Opened connection to {}", address);

        Ok(Self {
            address: address.clone(),
            writer,
            decoder: RespDecoder::new(reader),
            broken: false,
        })
    }

    fn fail(&mut self, err: io::Error) -> ConnectionError {
        self.broken = true;
        ConnectionError::io(&self.address, err)
    }
}

impl CommandChannel for RawConnection {
    fn address(&self) -> &NodeAddress {
        &self.address
    }

    fn send_encoded(&mut self, encoded: &[u8]) -> Result<(), ConnectionError> {
        if self.broken {
            return Err(ConnectionError::Closed(self.address.clone()));
        }
        let result = self
            .writer
            .write_all(encoded)
            .and_then(|_| self.writer.flush());
        result.map_err(|e| self.fail(e))
    }

    fn read_reply(&mut self) -> Result<RespValue, ConnectionError> {
        if self.broken {
            return Err(ConnectionError::Closed(self.address.clone()));
        }
        let result = self.decoder.decode();
        result.map_err(|e| self.fail(e))
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}

/// Creates connections with common settings
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
    pub auth: Option<AuthConfig>,
}

impl ConnectionFactory {
    pub fn new(connect_timeout: Duration, socket_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            socket_timeout,
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: Option<AuthConfig>) -> Self {
        self.auth = auth;
        self
    }

    /// Open a connection, authenticate it and, for replica pools, switch it
    /// to READONLY so replica reads are served locally.
    pub fn create(
        &self,
        address: &NodeAddress,
        readonly: bool,
    ) -> Result<RawConnection, ConnectionError> {
        let mut conn = RawConnection::connect(address, self.connect_timeout, self.socket_timeout)?;

        if let Some(ref auth) = self.auth {
            conn.authenticate(&auth.password, auth.username.as_deref())?;
        }

        if readonly {
            conn.readonly()?;
        }

        Ok(conn)
    }
}
