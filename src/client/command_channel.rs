//! Single-connection command execution
//!
//! `CommandChannel` is the capability the routing layer builds on: write
//! encoded requests, read replies in order. Everything else (one-shot
//! execution, pipelines, the cluster handshake commands) is layered on top
//! in `CommandChannelExt`, which every channel gets for free.

use crate::config::NodeAddress;
use crate::utils::{ConnectionError, ProtocolError, RespEncoder, RespValue, RouterError};

/// Ordered request/reply channel to one node
pub trait CommandChannel {
    /// Node this channel talks to
    fn address(&self) -> &NodeAddress;

    /// Write pre-encoded requests and flush
    fn send_encoded(&mut self, encoded: &[u8]) -> Result<(), ConnectionError>;

    /// Read the next reply
    fn read_reply(&mut self) -> Result<RespValue, ConnectionError>;

    /// Whether a previous I/O failure made this channel unusable
    fn is_broken(&self) -> bool;
}

/// Convenience operations built on [`CommandChannel`]
pub trait CommandChannelExt: CommandChannel {
    /// Send one command and read its reply
    fn execute<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<RespValue, ConnectionError> {
        let mut encoder = RespEncoder::with_capacity(64);
        encoder.encode_command(args);
        self.send_encoded(encoder.as_bytes())?;
        self.read_reply()
    }

    /// Write all commands in one flush, then read exactly as many replies
    fn execute_pipeline<C, A>(&mut self, commands: &[C]) -> Result<Vec<RespValue>, ConnectionError>
    where
        C: AsRef<[A]>,
        A: AsRef<[u8]>,
    {
        let mut encoder = RespEncoder::with_capacity(64 * commands.len().max(1));
        for command in commands {
            encoder.encode_command(command.as_ref());
        }
        self.send_encoded(encoder.as_bytes())?;

        let mut replies = Vec::with_capacity(commands.len());
        for _ in 0..commands.len() {
            replies.push(self.read_reply()?);
        }
        Ok(replies)
    }

    /// Send PING and verify PONG response
    fn ping(&mut self) -> Result<bool, ConnectionError> {
        match self.execute(&["PING"])? {
            RespValue::SimpleString(s) => Ok(s == "PONG"),
            _ => Ok(false),
        }
    }

    /// Get CLUSTER NODES response as string
    fn cluster_nodes(&mut self) -> Result<String, RouterError> {
        match self.execute(&["CLUSTER", "NODES"])? {
            RespValue::BulkString(data) => String::from_utf8(data)
                .map_err(|e| ProtocolError::Parse(format!("Invalid UTF-8: {}", e)).into()),
            RespValue::Error(e) => Err(ProtocolError::UnexpectedResponse {
                expected: "CLUSTER NODES bulk string".to_string(),
                actual: e,
            }
            .into()),
            other => Err(ProtocolError::UnexpectedResponse {
                expected: "CLUSTER NODES bulk string".to_string(),
                actual: format!("{:?}", other),
            }
            .into()),
        }
    }

    /// Send AUTH command
    fn authenticate(&mut self, password: &str, username: Option<&str>) -> Result<(), ConnectionError> {
        let response = match username {
            Some(user) => self.execute(&["AUTH", user, password])?,
            None => self.execute(&["AUTH", password])?,
        };

        match response {
            RespValue::SimpleString(s) if s == "OK" => Ok(()),
            RespValue::Error(e) => Err(ConnectionError::AuthFailed(e)),
            other => Err(ConnectionError::AuthFailed(format!(
                "Unexpected response: {:?}",
                other
            ))),
        }
    }

    /// Allow reads of replicated slots on this connection
    fn readonly(&mut self) -> Result<(), ConnectionError> {
        expect_ok(self, &["READONLY"])
    }

    /// One-shot permission to touch an importing slot with the next command
    fn asking(&mut self) -> Result<(), ConnectionError> {
        expect_ok(self, &["ASKING"])
    }
}

impl<T: CommandChannel + ?Sized> CommandChannelExt for T {}

fn expect_ok<C: CommandChannelExt + ?Sized>(
    channel: &mut C,
    args: &[&str],
) -> Result<(), ConnectionError> {
    match channel.execute(args)? {
        RespValue::SimpleString(s) if s == "OK" => Ok(()),
        other => {
            let reply = match other {
                RespValue::Error(e) => e,
                other => format!("{:?}", other),
            };
            Err(ConnectionError::Handshake {
                address: channel.address().clone(),
                reply,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::RespDecoder;
    use std::collections::VecDeque;
    use std::io::Cursor;

    /// In-memory channel replaying canned replies and recording requests
    struct ScriptedChannel {
        address: NodeAddress,
        replies: VecDeque<Result<RespValue, ConnectionError>>,
        sent: Vec<Vec<String>>,
        broken: bool,
    }

    impl ScriptedChannel {
        fn new(replies: Vec<RespValue>) -> Self {
            Self {
                address: NodeAddress::new("127.0.0.1", 7000),
                replies: replies.into_iter().map(Ok).collect(),
                sent: Vec::new(),
                broken: false,
            }
        }
    }

    impl CommandChannel for ScriptedChannel {
        fn address(&self) -> &NodeAddress {
            &self.address
        }

        fn send_encoded(&mut self, encoded: &[u8]) -> Result<(), ConnectionError> {
            let mut decoder = RespDecoder::new(Cursor::new(encoded));
            while let Ok(RespValue::Array(items)) = decoder.decode() {
                self.sent.push(
                    items
                        .iter()
                        .map(|v| v.as_str().unwrap_or_default().to_string())
                        .collect(),
                );
            }
            Ok(())
        }

        fn read_reply(&mut self) -> Result<RespValue, ConnectionError> {
            match self.replies.pop_front() {
                Some(reply) => reply,
                None => {
                    self.broken = true;
                    Err(ConnectionError::Closed(self.address.clone()))
                }
            }
        }

        fn is_broken(&self) -> bool {
            self.broken
        }
    }

    #[test]
    fn test_ping() {
        let mut channel = ScriptedChannel::new(vec![RespValue::SimpleString("PONG".to_string())]);
        assert!(channel.ping().unwrap());
        assert_eq!(channel.sent, vec![vec!["PING"]]);
    }

    #[test]
    fn test_pipeline_writes_all_then_reads_in_order() {
        let mut channel = ScriptedChannel::new(vec![
            RespValue::ok(),
            RespValue::bulk("v"),
            RespValue::Integer(1),
        ]);
        let commands = vec![
            vec!["SET", "k", "v"],
            vec!["GET", "k"],
            vec!["DEL", "k"],
        ];
        let replies = channel.execute_pipeline(&commands).unwrap();
        assert_eq!(
            replies,
            vec![RespValue::ok(), RespValue::bulk("v"), RespValue::Integer(1)]
        );
        assert_eq!(channel.sent.len(), 3);
        assert_eq!(channel.sent[2], vec!["DEL", "k"]);
    }

    #[test]
    fn test_pipeline_short_read_is_connection_failure() {
        let mut channel = ScriptedChannel::new(vec![RespValue::ok()]);
        let err = channel
            .execute_pipeline(&[vec!["PING"], vec!["PING"]])
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Closed(_)));
        assert!(channel.is_broken());
    }

    #[test]
    fn test_cluster_nodes_rejects_error_reply() {
        let mut channel = ScriptedChannel::new(vec![RespValue::Error(
            "ERR This instance has cluster support disabled".to_string(),
        )]);
        let err = channel.cluster_nodes().unwrap_err();
        assert!(matches!(err, RouterError::Protocol(_)));
    }

    #[test]
    fn test_asking_requires_ok() {
        let mut channel = ScriptedChannel::new(vec![
            RespValue::ok(),
            RespValue::Error("ERR unknown command 'ASKING'".to_string()),
        ]);
        assert!(channel.asking().is_ok());
        assert!(matches!(
            channel.asking().unwrap_err(),
            ConnectionError::Handshake { .. }
        ));
    }
}
