//! Partition routing with local fallback.
//!
//! A process-wide table maps partition identifiers to remote node
//! addresses. Routed reads try the remote first under a timeout and
//! fall back to local data on any failure — answering with possibly
//! stale data beats failing the request.

use crate::repl::stats::ReplStats;
use crate::resp::client::RespClient;
use crate::resp::RespValue;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hasher;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use twox_hash::XxHash64;

/// Outcome of a routed read attempt.
#[derive(Debug, PartialEq)]
pub enum RouteOutcome {
    /// No route for this key's partition: execute locally.
    Local,
    /// The remote call completed; its result is authoritative.
    Remote(Option<Vec<u8>>),
    /// The remote was unreachable or timed out: fall back to local.
    Failed,
}

/// Partition-to-address table plus remote-call machinery.
pub struct Router {
    partitions: u64,
    timeout: Duration,
    table: RwLock<HashMap<u64, SocketAddr>>,
    stats: Arc<ReplStats>,
}

impl Router {
    pub fn new(partitions: u64, timeout: Duration, stats: Arc<ReplStats>) -> Self {
        Self {
            partitions: partitions.max(1),
            timeout,
            table: RwLock::new(HashMap::new()),
            stats,
        }
    }

    /// Stable partition of a key.
    pub fn partition_of(&self, key: &[u8]) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(key);
        hasher.finish() % self.partitions
    }

    pub fn partitions(&self) -> u64 {
        self.partitions
    }

    pub fn set_route(&self, partition: u64, addr: SocketAddr) {
        self.table.write().insert(partition % self.partitions, addr);
    }

    pub fn remove_route(&self, partition: u64) -> bool {
        self.table.write().remove(&(partition % self.partitions)).is_some()
    }

    pub fn resolve(&self, partition: u64) -> Option<SocketAddr> {
        self.table.read().get(&partition).copied()
    }

    pub fn route_count(&self) -> usize {
        self.table.read().len()
    }

    pub fn clear(&self) {
        self.table.write().clear();
    }

    /// Routed scalar read. Counts every attempt; `routes_succeeded`
    /// only moves when the remote call completed.
    pub async fn remote_get(&self, space: &str, key: &[u8]) -> RouteOutcome {
        let Some(addr) = self.resolve(self.partition_of(key)) else {
            return RouteOutcome::Local;
        };

        self.stats.attempted_routes.fetch_add(1, Ordering::Relaxed);
        let command = format!("{}:GET", space);

        let result = tokio::time::timeout(self.timeout, async {
            let mut client = RespClient::connect(addr).await?;
            client.command(&[command.as_bytes(), key]).await
        })
        .await;

        match result {
            Ok(Ok(RespValue::Bulk(bytes))) => {
                self.stats.routes_succeeded.fetch_add(1, Ordering::Relaxed);
                RouteOutcome::Remote(Some(bytes.to_vec()))
            }
            Ok(Ok(RespValue::Null)) => {
                self.stats.routes_succeeded.fetch_add(1, Ordering::Relaxed);
                RouteOutcome::Remote(None)
            }
            Ok(Ok(other)) => {
                // The remote answered with an error token; treat it as
                // a failed route and serve locally.
                tracing::debug!(peer = %addr, reply = ?other, "routed read rejected");
                self.stats.request_errors.fetch_add(1, Ordering::Relaxed);
                RouteOutcome::Failed
            }
            _ => {
                self.stats.request_errors.fetch_add(1, Ordering::Relaxed);
                RouteOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::codec::encode;
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn router(stats: &Arc<ReplStats>) -> Router {
        Router::new(64, Duration::from_millis(300), Arc::clone(stats))
    }

    #[test]
    fn test_partition_stable_and_bounded() {
        let stats = Arc::new(ReplStats::new());
        let r = router(&stats);
        let p = r.partition_of(b"some-key");
        assert_eq!(p, r.partition_of(b"some-key"));
        assert!(p < 64);
    }

    #[test]
    fn test_table_mutation() {
        let stats = Arc::new(ReplStats::new());
        let r = router(&stats);
        let addr: SocketAddr = "127.0.0.1:6500".parse().unwrap();
        r.set_route(7, addr);
        assert_eq!(r.resolve(7), Some(addr));
        assert_eq!(r.route_count(), 1);
        assert!(r.remove_route(7));
        assert!(!r.remove_route(7));
        assert_eq!(r.resolve(7), None);
    }

    #[tokio::test]
    async fn test_no_route_is_local() {
        let stats = Arc::new(ReplStats::new());
        let r = router(&stats);
        assert_eq!(r.remote_get("default", b"k").await, RouteOutcome::Local);
        assert_eq!(stats.snapshot().attempted_routes, 0);
    }

    #[tokio::test]
    async fn test_remote_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(&encode(&RespValue::Bulk(Bytes::from("remote-v"))))
                .await;
        });

        let stats = Arc::new(ReplStats::new());
        let r = router(&stats);
        // Route every partition at this remote.
        for partition in 0..64 {
            r.set_route(partition, addr);
        }

        let outcome = r.remote_get("default", b"k").await;
        assert_eq!(outcome, RouteOutcome::Remote(Some(b"remote-v".to_vec())));
        let snap = stats.snapshot();
        assert_eq!(snap.attempted_routes, 1);
        assert_eq!(snap.routes_succeeded, 1);
        assert_eq!(snap.request_errors, 0);
    }

    #[tokio::test]
    async fn test_unreachable_remote_falls_back() {
        let dead_addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let stats = Arc::new(ReplStats::new());
        let r = router(&stats);
        for partition in 0..64 {
            r.set_route(partition, dead_addr);
        }

        let outcome = r.remote_get("default", b"k").await;
        assert_eq!(outcome, RouteOutcome::Failed);
        let snap = stats.snapshot();
        assert_eq!(snap.attempted_routes, 1);
        assert_eq!(snap.routes_succeeded, 0);
        assert!(snap.request_errors > 0);
    }
}
