//! Minimal RESP client for node-to-node calls.
//!
//! Used by the pull engine (read-through fetches) and the router
//! (remote execution). One request in flight per connection; callers
//! wrap calls in their own timeout.

use super::codec::{encode_into, ParseResult, RespParser};
use super::RespValue;
use bytes::{Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A connected RESP peer.
pub struct RespClient {
    stream: TcpStream,
    buffer: BytesMut,
    parser: RespParser,
}

impl RespClient {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            parser: RespParser::new(),
        })
    }

    /// Send one command and read its reply.
    pub async fn command(&mut self, parts: &[&[u8]]) -> io::Result<RespValue> {
        let mut frame = Vec::with_capacity(64);
        let items: Vec<RespValue> = parts
            .iter()
            .map(|p| RespValue::Bulk(Bytes::copy_from_slice(p)))
            .collect();
        encode_into(&RespValue::Array(items), &mut frame);
        self.stream.write_all(&frame).await?;

        loop {
            match self.parser.parse(&self.buffer) {
                ParseResult::Ok(value, consumed) => {
                    let _ = self.buffer.split_to(consumed);
                    return Ok(value);
                }
                ParseResult::Incomplete => {
                    let read = self.stream.read_buf(&mut self.buffer).await?;
                    if read == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "peer closed mid-reply",
                        ));
                    }
                }
                ParseResult::Error(e) => {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e));
                }
            }
        }
    }
}
