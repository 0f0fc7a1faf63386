//! The embeddable store handle.
//!
//! `Store` owns every subsystem: the space registry, the memory
//! governor, the replication publisher and puller, the router, and
//! the wire listener. The embedding application drives the lifecycle
//! (`start`/`stop`, `pull`, `publish`, `set_route`, `save_all`,
//! `clear_all`); request handlers and background tasks share the
//! inner state through an `Arc`.

use crate::core::config::{parse_route_entry, Config};
use crate::core::error::{StrataError, StrataResult};
use crate::engine::governor::MemoryGovernor;
use crate::engine::registry::{SpaceRegistry, DEFAULT_SPACE};
use crate::engine::space::{MutationObserver, Space};
use crate::engine::stats::{EngineStats, StatsSnapshot};
use crate::engine::tunables::Tunables;
use crate::engine::value::ValueRepr;
use crate::repl::publisher::Publisher;
use crate::repl::puller::Puller;
use crate::repl::stats::{ReplSnapshot, ReplStats};
use crate::route::{RouteOutcome, Router};
use crate::server::ServerHandle;
use anyhow::Context;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Shared state behind a running store.
pub struct StoreInner {
    pub config: Config,
    pub registry: Arc<SpaceRegistry>,
    pub stats: Arc<EngineStats>,
    pub repl_stats: Arc<ReplStats>,
    pub publisher: Arc<Publisher>,
    pub puller: RwLock<Option<Arc<Puller>>>,
    pub router: Arc<Router>,
    pub data_dir: PathBuf,
    pub started_at: Instant,
}

impl StoreInner {
    /// The full routed read path: remote route first, then the local
    /// shard set with dependency fallback, then the pull source.
    pub async fn get_routed(&self, space_name: &str, key: &[u8]) -> StrataResult<Option<Vec<u8>>> {
        let space = self.registry.open(space_name)?;

        match self.router.remote_get(space_name, key).await {
            RouteOutcome::Remote(value) => return Ok(value),
            RouteOutcome::Local | RouteOutcome::Failed => {}
        }

        if let Some(value) = space.get(key)? {
            return Ok(Some(value));
        }

        let puller = self.puller.read().clone();
        if let Some(puller) = puller {
            if let Some(bytes) = puller.fetch(space_name, key).await {
                space.apply_add(key, ValueRepr::Scalar(bytes.clone()), None)?;
                return Ok(Some(bytes));
            }
        }

        Ok(None)
    }
}

/// An embeddable, network-addressable key-value store.
pub struct Store {
    inner: Arc<StoreInner>,
    governor: Mutex<Option<MemoryGovernor>>,
    server: Mutex<Option<ServerHandle>>,
    autosave: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Store {
    /// Build a store from configuration: create the registry, install
    /// the replication observer, load snapshots, and wire configured
    /// peers and routes. No background work starts here.
    pub fn open(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        let stats = Arc::new(EngineStats::new());
        let tunables = Arc::new(Tunables::from_config(&config));
        let registry = Arc::new(SpaceRegistry::new(
            config.storage.shard_count,
            Arc::clone(&stats),
            Arc::clone(&tunables),
        ));

        let repl_stats = Arc::new(ReplStats::new());
        let publisher = Arc::new(Publisher::new(Arc::clone(&repl_stats)));
        registry.set_observer(Arc::clone(&publisher) as Arc<dyn MutationObserver>);

        let router = Arc::new(Router::new(
            config.routes.partitions,
            Duration::from_millis(config.routes.timeout_ms),
            Arc::clone(&repl_stats),
        ));
        for entry in &config.routes.entries {
            let (partition, addr) = parse_route_entry(entry)?;
            router.set_route(partition, addr);
        }

        let data_dir = PathBuf::from(&config.storage.data_dir);
        let loaded = crate::snapshot::load_all(&data_dir, &registry)
            .with_context(|| format!("loading snapshots from {}", data_dir.display()))?;
        if loaded > 0 {
            tracing::info!(spaces = loaded, dir = %data_dir.display(), "snapshots loaded");
        }

        // The default space always exists.
        registry.open(DEFAULT_SPACE)?;

        let inner = Arc::new(StoreInner {
            registry,
            stats,
            repl_stats,
            publisher,
            puller: RwLock::new(None),
            router,
            data_dir,
            started_at: Instant::now(),
            config,
        });

        let store = Self {
            inner,
            governor: Mutex::new(None),
            server: Mutex::new(None),
            autosave: Mutex::new(None),
        };

        // Configured replication peers.
        for peer in store.inner.config.replication.publish.clone() {
            store.publish_str(&peer)?;
        }
        if let Some(source) = store.inner.config.replication.pull.clone() {
            store.pull_str(&source)?;
        }

        Ok(store)
    }

    pub fn inner(&self) -> Arc<StoreInner> {
        Arc::clone(&self.inner)
    }

    // ------------------------------------------------------------------
    // Space access (in-process embedding)
    // ------------------------------------------------------------------

    pub fn space(&self, name: &str) -> StrataResult<Arc<Space>> {
        self.inner.registry.open(name)
    }

    pub fn default_space(&self) -> Arc<Space> {
        self.inner
            .registry
            .open(DEFAULT_SPACE)
            .expect("default space always valid")
    }

    pub fn registry(&self) -> &Arc<SpaceRegistry> {
        &self.inner.registry
    }

    /// Routed read against a named space.
    pub async fn get(&self, space: &str, key: &[u8]) -> StrataResult<Option<Vec<u8>>> {
        self.inner.get_routed(space, key).await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Launch the wire listener on `addr` and the maintenance loop.
    /// Returns the bound address (useful with port 0).
    pub async fn start(&self, addr: SocketAddr) -> StrataResult<SocketAddr> {
        self.start_maintenance().await;

        let mut server = self.server.lock().await;
        if server.is_some() {
            return Err(StrataError::SpaceInUse {
                message: "listener already running".to_string(),
            });
        }
        let handle = crate::server::start_server(self.inner(), addr).await?;
        let bound = handle.addr();
        *server = Some(handle);
        tracing::info!(addr = %bound, "listener started");
        Ok(bound)
    }

    /// Start the memory governor and the autosave loop without a
    /// listener (pure in-process embedding).
    pub async fn start_maintenance(&self) {
        let mut governor = self.governor.lock().await;
        if governor.is_none() {
            *governor = Some(MemoryGovernor::start(Arc::clone(&self.inner.registry)));
        }

        let mut autosave = self.autosave.lock().await;
        if autosave.is_none() && self.inner.config.storage.save_interval_ms > 0 {
            let inner = self.inner();
            *autosave = Some(tokio::spawn(async move {
                loop {
                    let interval = inner.registry.tunables().save_interval_ms();
                    if interval == 0 {
                        // Autosave disabled at runtime; re-check later.
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                    tokio::time::sleep(Duration::from_millis(interval)).await;
                    if let Err(e) = crate::snapshot::save_all(&inner.data_dir, &inner.registry) {
                        tracing::warn!(error = %e, "periodic save failed");
                    }
                }
            }));
        }
    }

    /// Tear everything down: listener, governor, autosave, publisher.
    pub async fn stop(&self) {
        if let Some(server) = self.server.lock().await.take() {
            server.stop().await;
        }
        if let Some(governor) = self.governor.lock().await.take() {
            governor.stop().await;
        }
        if let Some(autosave) = self.autosave.lock().await.take() {
            autosave.abort();
        }
        self.inner.publisher.shutdown();
        tracing::info!("store stopped");
    }

    /// Bound listener address, when running.
    pub async fn listen_addr(&self) -> Option<SocketAddr> {
        self.server.lock().await.as_ref().map(|s| s.addr())
    }

    // ------------------------------------------------------------------
    // Replication and routing controls
    // ------------------------------------------------------------------

    /// Configure a read-through pull source.
    pub fn pull(&self, addr: SocketAddr) {
        let timeout = Duration::from_millis(self.inner.config.replication.peer_timeout_ms);
        *self.inner.puller.write() = Some(Arc::new(Puller::new(
            addr,
            timeout,
            Arc::clone(&self.inner.repl_stats),
        )));
        tracing::info!(source = %addr, "pull source configured");
    }

    fn pull_str(&self, addr: &str) -> anyhow::Result<()> {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid pull source: {}", addr))?;
        self.pull(addr);
        Ok(())
    }

    /// Subscribe a push-replication peer.
    pub fn publish(&self, addr: SocketAddr) {
        self.inner.publisher.subscribe(addr);
    }

    fn publish_str(&self, addr: &str) -> anyhow::Result<()> {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid publish peer: {}", addr))?;
        self.publish(addr);
        Ok(())
    }

    /// Map a partition to a remote node.
    pub fn set_route(&self, partition: u64, addr: SocketAddr) {
        self.inner.router.set_route(partition, addr);
    }

    pub fn remove_route(&self, partition: u64) -> bool {
        self.inner.router.remove_route(partition)
    }

    // ------------------------------------------------------------------
    // Persistence and administration
    // ------------------------------------------------------------------

    /// Save one space to disk.
    pub fn save(&self, space: &str) -> StrataResult<u64> {
        let space = self.inner.registry.get(space)?;
        crate::snapshot::save_space(&self.inner.data_dir, &space)
    }

    /// Save every space to disk.
    pub fn save_all(&self) -> StrataResult<u64> {
        crate::snapshot::save_all(&self.inner.data_dir, &self.inner.registry)
    }

    /// Drop all data in one space.
    pub fn clear(&self, space: &str) -> StrataResult<()> {
        self.inner.registry.get(space)?.clear();
        Ok(())
    }

    /// Drop all data in every space.
    pub fn clear_all(&self) {
        self.inner.registry.clear_all();
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn repl_stats(&self) -> ReplSnapshot {
        self.inner.repl_stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::shard::SetOptions;
    use crate::engine::value::Value;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = dir.to_string_lossy().to_string();
        config.storage.save_interval_ms = 0;
        config
    }

    #[tokio::test]
    async fn test_open_creates_default_space() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(test_config(dir.path())).unwrap();
        assert!(store.registry().exists(DEFAULT_SPACE));
        store.stop().await;
    }

    #[tokio::test]
    async fn test_local_get_without_routes_or_pull() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(test_config(dir.path())).unwrap();
        store
            .default_space()
            .set(b"k", Value::scalar("v"), SetOptions::default())
            .unwrap();
        assert_eq!(
            store.get(DEFAULT_SPACE, b"k").await.unwrap(),
            Some(b"v".to_vec())
        );
        assert_eq!(store.get(DEFAULT_SPACE, b"missing").await.unwrap(), None);
        store.stop().await;
    }

    #[tokio::test]
    async fn test_save_restart_load() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(test_config(dir.path())).unwrap();
            store
                .default_space()
                .set(b"persist", Value::scalar("me"), SetOptions::default())
                .unwrap();
            store.save_all().unwrap();
            store.stop().await;
        }
        let store = Store::open(test_config(dir.path())).unwrap();
        assert_eq!(
            store.default_space().get(b"persist").unwrap(),
            Some(b"me".to_vec())
        );
        store.stop().await;
    }

    #[tokio::test]
    async fn test_clear_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(test_config(dir.path())).unwrap();
        store
            .space("a")
            .unwrap()
            .set(b"k", Value::scalar("v"), SetOptions::default())
            .unwrap();
        store.clear_all();
        assert_eq!(store.space("a").unwrap().own_len(), 0);
        store.stop().await;
    }
}
