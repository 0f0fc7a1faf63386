//! Pull replication: read-through fetch on local miss.
//!
//! With a source configured, a local cache miss turns into a
//! synchronous wire fetch; a hit populates the local shard, making the
//! store a read-through cache layered over the source. The source's
//! own size never changes.

use crate::resp::client::RespClient;
use crate::resp::RespValue;
use crate::repl::stats::ReplStats;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Client side of the pull role. One pooled connection, re-opened on
/// failure.
pub struct Puller {
    addr: SocketAddr,
    timeout: Duration,
    conn: Mutex<Option<RespClient>>,
    stats: Arc<ReplStats>,
}

impl Puller {
    pub fn new(addr: SocketAddr, timeout: Duration, stats: Arc<ReplStats>) -> Self {
        Self {
            addr,
            timeout,
            conn: Mutex::new(None),
            stats,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Fetch a scalar key from the source. `None` covers both a source
    /// miss and a transport failure — the caller reports NotFound
    /// either way.
    pub async fn fetch(&self, space: &str, key: &[u8]) -> Option<Vec<u8>> {
        self.stats.pulls_attempted.fetch_add(1, Ordering::Relaxed);

        // Address the source's space directly via command prefixing.
        let command = format!("{}:GET", space);
        let mut conn = self.conn.lock().await;

        for attempt in 0..2 {
            if conn.is_none() {
                match tokio::time::timeout(self.timeout, RespClient::connect(self.addr)).await {
                    Ok(Ok(client)) => *conn = Some(client),
                    _ => {
                        tracing::debug!(source = %self.addr, "pull connect failed");
                        return None;
                    }
                }
            }

            let Some(client) = conn.as_mut() else {
                return None;
            };
            let reply =
                tokio::time::timeout(self.timeout, client.command(&[command.as_bytes(), key]))
                    .await;
            match reply {
                Ok(Ok(RespValue::Bulk(bytes))) => {
                    self.stats.keys_pulled.fetch_add(1, Ordering::Relaxed);
                    return Some(bytes.to_vec());
                }
                Ok(Ok(_)) => return None, // nil or error reply: source miss
                _ => {
                    // Stale pooled connection: drop it and retry once
                    // with a fresh stream.
                    *conn = None;
                    if attempt == 1 {
                        return None;
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::codec::encode;
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A single-reply RESP stub: always answers with the given value.
    async fn stub_source(reply: RespValue) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let reply = reply.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    loop {
                        let Ok(n) = socket.read(&mut buf).await else {
                            return;
                        };
                        if n == 0 {
                            return;
                        }
                        if socket.write_all(&encode(&reply)).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_fetch_hit() {
        let addr = stub_source(RespValue::Bulk(Bytes::from("pulled-value"))).await;
        let stats = Arc::new(ReplStats::new());
        let puller = Puller::new(addr, Duration::from_secs(1), Arc::clone(&stats));

        let value = puller.fetch("default", b"k").await;
        assert_eq!(value, Some(b"pulled-value".to_vec()));
        let snap = stats.snapshot();
        assert_eq!(snap.pulls_attempted, 1);
        assert_eq!(snap.keys_pulled, 1);
    }

    #[tokio::test]
    async fn test_fetch_source_miss() {
        let addr = stub_source(RespValue::Null).await;
        let stats = Arc::new(ReplStats::new());
        let puller = Puller::new(addr, Duration::from_secs(1), Arc::clone(&stats));

        assert_eq!(puller.fetch("default", b"k").await, None);
        let snap = stats.snapshot();
        assert_eq!(snap.pulls_attempted, 1);
        assert_eq!(snap.keys_pulled, 0);
    }

    #[tokio::test]
    async fn test_fetch_unreachable_source() {
        let dead_addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let stats = Arc::new(ReplStats::new());
        let puller = Puller::new(dead_addr, Duration::from_millis(200), Arc::clone(&stats));
        assert_eq!(puller.fetch("default", b"k").await, None);
    }
}
