//! RESP (REdis Serialization Protocol) codec
//!
//! Requests are always encoded as arrays of bulk strings. Replies are
//! decoded from any buffered reader into [`RespValue`], one complete
//! reply per call, so a connection's replies are consumed strictly in
//! the order their requests were written.

use std::io::{self, BufRead, Read};

/// Largest bulk string accepted from a server (its `proto-max-bulk-len` default)
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// RESP value types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Simple string (+OK\r\n)
    SimpleString(String),
    /// Error (-ERR message\r\n)
    Error(String),
    /// Integer (:1000\r\n)
    Integer(i64),
    /// Bulk string ($6\r\nfoobar\r\n)
    BulkString(Vec<u8>),
    /// Null bulk string ($-1\r\n) or null array (*-1\r\n)
    Null,
    /// Array (*2\r\n...)
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Shorthand for a bulk string reply
    pub fn bulk(data: impl AsRef<[u8]>) -> Self {
        RespValue::BulkString(data.as_ref().to_vec())
    }

    /// Shorthand for `+OK`
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Check if this is an error reply
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Error text, if this is an error reply
    pub fn error_message(&self) -> Option<&str> {
        match self {
            RespValue::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Get as string (for simple string or bulk string)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Get as bytes (for bulk string)
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(b) => Some(b),
            _ => None,
        }
    }

    /// Get as integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as array
    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }
}

/// RESP encoder with a reusable buffer
pub struct RespEncoder {
    buf: Vec<u8>,
}

impl RespEncoder {
    /// Create new encoder with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Clear buffer for reuse
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Get encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Take ownership of buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Encode a request as an array of bulk strings
    pub fn encode_command<A: AsRef<[u8]>>(&mut self, args: &[A]) {
        self.buf.push(b'*');
        self.write_int(args.len() as i64);
        self.buf.extend_from_slice(b"\r\n");

        for arg in args {
            let arg = arg.as_ref();
            self.buf.push(b'$');
            self.write_int(arg.len() as i64);
            self.buf.extend_from_slice(b"\r\n");
            self.buf.extend_from_slice(arg);
            self.buf.extend_from_slice(b"\r\n");
        }
    }

    /// Encode an arbitrary reply value (server side of the protocol)
    pub fn encode_value(&mut self, value: &RespValue) {
        match value {
            RespValue::SimpleString(s) => self.write_line(b'+', s.as_bytes()),
            RespValue::Error(e) => self.write_line(b'-', e.as_bytes()),
            RespValue::Integer(i) => {
                self.buf.push(b':');
                self.write_int(*i);
                self.buf.extend_from_slice(b"\r\n");
            }
            RespValue::BulkString(data) => {
                self.buf.push(b'$');
                self.write_int(data.len() as i64);
                self.buf.extend_from_slice(b"\r\n");
                self.buf.extend_from_slice(data);
                self.buf.extend_from_slice(b"\r\n");
            }
            RespValue::Null => self.buf.extend_from_slice(b"$-1\r\n"),
            RespValue::Array(items) => {
                self.buf.push(b'*');
                self.write_int(items.len() as i64);
                self.buf.extend_from_slice(b"\r\n");
                for item in items {
                    self.encode_value(item);
                }
            }
        }
    }

    fn write_line(&mut self, prefix: u8, content: &[u8]) {
        self.buf.push(prefix);
        self.buf.extend_from_slice(content);
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Write integer using fast itoa
    #[inline]
    fn write_int(&mut self, value: i64) {
        let mut buffer = itoa::Buffer::new();
        let s = buffer.format(value);
        self.buf.extend_from_slice(s.as_bytes());
    }
}

/// RESP decoder for streaming reads
pub struct RespDecoder<R> {
    reader: R,
    line_buf: Vec<u8>,
}

impl<R: BufRead> RespDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_buf: Vec::with_capacity(256),
        }
    }

    /// Decode next RESP value from stream
    pub fn decode(&mut self) -> io::Result<RespValue> {
        self.read_line()?;

        let type_byte = self.line_buf[0];
        let content = &self.line_buf[1..];

        match type_byte {
            b'+' => Ok(RespValue::SimpleString(
                String::from_utf8_lossy(content).into_owned(),
            )),
            b'-' => Ok(RespValue::Error(String::from_utf8_lossy(content).into_owned())),
            b':' => Ok(RespValue::Integer(parse_int(content, "Invalid integer")?)),
            b'$' => {
                let len = parse_int(content, "Invalid bulk string length")?;
                if len < 0 {
                    return Ok(RespValue::Null);
                }

                if len > MAX_BULK_LEN {
                    return Err(invalid_data(&format!(
                        "Bulk string length {} exceeds {}",
                        len, MAX_BULK_LEN
                    )));
                }

                // grow with what actually arrives instead of trusting the header
                let mut data = Vec::with_capacity((len as usize).min(64 * 1024));
                (&mut self.reader).take(len as u64).read_to_end(&mut data)?;
                if data.len() as i64 != len {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "Bulk string truncated",
                    ));
                }

                let mut crlf = [0u8; 2];
                self.reader.read_exact(&mut crlf)?;
                if &crlf != b"\r\n" {
                    return Err(invalid_data("Bulk string not terminated by CRLF"));
                }

                Ok(RespValue::BulkString(data))
            }
            b'*' => {
                let count = parse_int(content, "Invalid array length")?;
                if count < 0 {
                    return Ok(RespValue::Null);
                }

                let mut elements = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    elements.push(self.decode()?);
                }

                Ok(RespValue::Array(elements))
            }
            other => Err(invalid_data(&format!(
                "Invalid RESP type byte: {}",
                other as char
            ))),
        }
    }

    /// Decode `count` consecutive replies (pipeline read-back)
    pub fn decode_many(&mut self, count: usize) -> io::Result<Vec<RespValue>> {
        let mut responses = Vec::with_capacity(count);
        for _ in 0..count {
            responses.push(self.decode()?);
        }
        Ok(responses)
    }

    /// Read one CRLF-terminated line into `line_buf` without the terminator
    fn read_line(&mut self) -> io::Result<()> {
        self.line_buf.clear();
        let n = self.reader.read_until(b'\n', &mut self.line_buf)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Connection closed",
            ));
        }
        if !self.line_buf.ends_with(b"\r\n") {
            return Err(invalid_data("RESP line not terminated by CRLF"));
        }
        self.line_buf.truncate(self.line_buf.len() - 2);
        if self.line_buf.is_empty() {
            return Err(invalid_data("Empty RESP line"));
        }
        Ok(())
    }
}

fn parse_int(content: &[u8], what: &str) -> io::Result<i64> {
    std::str::from_utf8(content)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| invalid_data(what))
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn decode(data: &[u8]) -> io::Result<RespValue> {
        RespDecoder::new(Cursor::new(data)).decode()
    }

    #[test]
    fn test_encode_set_command() {
        let mut encoder = RespEncoder::with_capacity(64);
        encoder.encode_command(&["SET", "key", "value"]);
        assert_eq!(
            encoder.as_bytes(),
            b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n"
        );
    }

    #[test]
    fn test_encode_binary_argument() {
        let mut encoder = RespEncoder::with_capacity(64);
        let args: [&[u8]; 2] = [b"GET", b"\x00\r\n"];
        encoder.encode_command(&args);
        assert_eq!(encoder.as_bytes(), b"*2\r\n$3\r\nGET\r\n$3\r\n\x00\r\n\r\n");
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(decode(b"+OK\r\n").unwrap(), RespValue::ok());
        assert_eq!(
            decode(b"-MOVED 12182 127.0.0.1:7381\r\n").unwrap(),
            RespValue::Error("MOVED 12182 127.0.0.1:7381".to_string())
        );
        assert_eq!(decode(b":-42\r\n").unwrap(), RespValue::Integer(-42));
        assert_eq!(decode(b"$6\r\nfoobar\r\n").unwrap(), RespValue::bulk("foobar"));
        assert_eq!(decode(b"$0\r\n\r\n").unwrap(), RespValue::bulk(""));
    }

    #[test]
    fn test_decode_nulls() {
        assert_eq!(decode(b"$-1\r\n").unwrap(), RespValue::Null);
        assert_eq!(decode(b"*-1\r\n").unwrap(), RespValue::Null);
    }

    #[test]
    fn test_decode_nested_array() {
        let value = decode(b"*2\r\n*1\r\n:1\r\n$3\r\nbar\r\n").unwrap();
        assert_eq!(
            value,
            RespValue::Array(vec![
                RespValue::Array(vec![RespValue::Integer(1)]),
                RespValue::bulk("bar"),
            ])
        );
    }

    #[test]
    fn test_decode_binary_bulk_with_crlf_inside() {
        let value = decode(b"$4\r\na\r\nb\r\n").unwrap();
        assert_eq!(value, RespValue::bulk(b"a\r\nb"));
    }

    #[test]
    fn test_decode_many_preserves_order() {
        let data = b"+OK\r\n:1\r\n$1\r\nx\r\n";
        let mut decoder = RespDecoder::new(Cursor::new(&data[..]));
        let replies = decoder.decode_many(3).unwrap();
        assert_eq!(
            replies,
            vec![RespValue::ok(), RespValue::Integer(1), RespValue::bulk("x")]
        );
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            decode(b"").unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
        assert_eq!(
            decode(b"?what\r\n").unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
        assert_eq!(
            decode(b":abc\r\n").unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
        assert_eq!(
            decode(b"$3\r\nabcXY").unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
        // truncated bulk payload
        assert_eq!(
            decode(b"$10\r\nabc").unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn test_decode_rejects_oversized_bulk_header() {
        let err = decode(b"$4611686018427387903\r\nabc\r\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let at_limit = format!("${}\r\nabc\r\n", MAX_BULK_LEN);
        assert_eq!(
            decode(at_limit.as_bytes()).unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn test_encode_value_is_decodable() {
        let value = RespValue::Array(vec![
            RespValue::ok(),
            RespValue::Error("ERR nope".to_string()),
            RespValue::Integer(7),
            RespValue::bulk("v"),
            RespValue::Null,
        ]);
        let mut encoder = RespEncoder::with_capacity(64);
        encoder.encode_value(&value);
        assert_eq!(decode(encoder.as_bytes()).unwrap(), value);
    }
}
