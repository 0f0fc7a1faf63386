//! Common test utilities.
//!
//! Shared helpers for integration tests. Import with `mod common;`.

#![allow(dead_code)]

use std::net::SocketAddr;
use strata::config::Config;
use strata::resp::client::RespClient;
use strata::resp::RespValue;
use strata::Store;
use tempfile::TempDir;

/// A store bound to a temp data directory, with fast maintenance.
pub struct TestStore {
    pub store: Store,
    pub dir: TempDir,
}

/// Build a config rooted in `dir` with test-friendly timings.
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().to_string_lossy().to_string();
    config.storage.shard_count = 4;
    config.storage.save_interval_ms = 0;
    config.memory.maintenance_poll_ms = 10;
    config.routes.timeout_ms = 500;
    config.replication.peer_timeout_ms = 500;
    config
}

/// Open a store on a fresh temp directory.
pub fn open_store() -> TestStore {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(&dir);
    let store = Store::open(config).expect("open store");
    TestStore { store, dir }
}

/// Open a store with a customized config (same temp dir handling).
pub fn open_store_with(f: impl FnOnce(&mut Config)) -> TestStore {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(&dir);
    f(&mut config);
    let store = Store::open(config).expect("open store");
    TestStore { store, dir }
}

/// Start the listener on an ephemeral port.
pub async fn start_listening(store: &Store) -> SocketAddr {
    store
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .expect("start listener")
}

/// A thin wire client speaking RESP to a test server.
pub struct TestClient {
    client: RespClient,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        Self {
            client: RespClient::connect(addr).await.expect("connect"),
        }
    }

    /// Send a command from string parts.
    pub async fn cmd(&mut self, parts: &[&str]) -> RespValue {
        let raw: Vec<&[u8]> = parts.iter().map(|p| p.as_bytes()).collect();
        self.client.command(&raw).await.expect("command")
    }

    /// Send a command and expect +OK.
    pub async fn ok(&mut self, parts: &[&str]) {
        let reply = self.cmd(parts).await;
        assert_eq!(
            reply,
            RespValue::ok(),
            "expected +OK for {:?}, got {:?}",
            parts,
            reply
        );
    }

    /// Send a command and expect an integer reply.
    pub async fn int(&mut self, parts: &[&str]) -> i64 {
        let reply = self.cmd(parts).await;
        reply
            .as_int()
            .unwrap_or_else(|| panic!("expected integer for {:?}, got {:?}", parts, reply))
    }

    /// Send a command and return the bulk payload, None for nil.
    pub async fn bulk(&mut self, parts: &[&str]) -> Option<Vec<u8>> {
        match self.cmd(parts).await {
            RespValue::Bulk(b) => Some(b.to_vec()),
            RespValue::Null => None,
            other => panic!("expected bulk or nil for {:?}, got {:?}", parts, other),
        }
    }

    /// Send a command and return array elements.
    pub async fn array(&mut self, parts: &[&str]) -> Vec<RespValue> {
        match self.cmd(parts).await {
            RespValue::Array(items) => items,
            other => panic!("expected array for {:?}, got {:?}", parts, other),
        }
    }
}

/// Wait until `check` passes or `attempts * 20ms` elapse.
pub async fn eventually(attempts: usize, mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..attempts {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    check()
}
