//! Configuration parsing and validation.
//!
//! Strata configuration is loaded from TOML files with CLI overrides.
//! A small subset (memory budget, eviction policy, maintenance cadence)
//! is additionally runtime-mutable through `CONFIG SET`; see
//! [`crate::engine::tunables`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level Strata configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Sharding and persistence.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Memory budget and eviction.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Listener for the wire protocol.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Push/pull replication peers.
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Partition routing.
    #[serde(default)]
    pub routes: RoutesConfig,

    /// Logging.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            memory: MemoryConfig::default(),
            listener: ListenerConfig::default(),
            replication: ReplicationConfig::default(),
            routes: RoutesConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Sharding and persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Shards per space. Fixed for the life of every space created by
    /// this process.
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    /// Directory for snapshot files.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Periodic save interval in milliseconds (0 disables).
    #[serde(default = "default_save_interval_ms")]
    pub save_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            data_dir: default_data_dir(),
            save_interval_ms: default_save_interval_ms(),
        }
    }
}

/// Memory budget and eviction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Resident byte budget, with optional k/m/g suffix ("100m").
    /// Empty means unbounded.
    #[serde(default)]
    pub max_memory_bytes: String,

    /// Eviction policy: allkeys-lru, volatile-lru, allkeys-lfu,
    /// volatile-lfu, allkeys-random, volatile-random, volatile-ttl,
    /// or none.
    #[serde(default = "default_eviction_policy")]
    pub eviction_policy: String,

    /// Maintenance loop poll delay in milliseconds.
    #[serde(default = "default_maintenance_poll_ms")]
    pub maintenance_poll_ms: u64,

    /// Whether the governor performs defragmentation passes.
    #[serde(default)]
    pub active_defrag: bool,

    /// Fragmentation ratio (slack / capacity) above which a shard is
    /// eligible for defragmentation.
    #[serde(default = "default_min_fragmentation_ratio")]
    pub min_fragmentation_ratio: f32,

    /// Maximum entries consolidated per defrag cycle.
    #[serde(default = "default_max_defrag_pages")]
    pub max_defrag_pages: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: String::new(),
            eviction_policy: default_eviction_policy(),
            maintenance_poll_ms: default_maintenance_poll_ms(),
            active_defrag: false,
            min_fragmentation_ratio: default_min_fragmentation_ratio(),
            max_defrag_pages: default_max_defrag_pages(),
        }
    }
}

/// Wire-protocol listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Bind address (e.g. "127.0.0.1:6543"). Empty disables the
    /// listener (pure in-process embedding).
    #[serde(default)]
    pub bind: String,

    /// Maximum queued commands in a `pipe:` deferred-apply context.
    #[serde(default = "default_max_pipeline_depth")]
    pub max_pipeline_depth: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: String::new(),
            max_pipeline_depth: default_max_pipeline_depth(),
        }
    }
}

/// Replication peer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Peers to publish mutations to ("host:port").
    #[serde(default)]
    pub publish: Vec<String>,

    /// Source node for read-through pulls ("host:port").
    #[serde(default)]
    pub pull: Option<String>,

    /// Remote operation timeout in milliseconds.
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            publish: Vec::new(),
            pull: None,
            peer_timeout_ms: default_peer_timeout_ms(),
        }
    }
}

/// Partition routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutesConfig {
    /// Number of route partitions the keyspace hashes into.
    #[serde(default = "default_route_partitions")]
    pub partitions: u64,

    /// Remote call timeout in milliseconds.
    #[serde(default = "default_route_timeout_ms")]
    pub timeout_ms: u64,

    /// Static route entries, "partition=host:port".
    #[serde(default)]
    pub entries: Vec<String>,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            partitions: default_route_partitions(),
            timeout_ms: default_route_timeout_ms(),
            entries: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_shard_count() -> usize {
    8
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_save_interval_ms() -> u64 {
    120_000
}

fn default_eviction_policy() -> String {
    "none".to_string()
}

fn default_maintenance_poll_ms() -> u64 {
    100
}

fn default_min_fragmentation_ratio() -> f32 {
    0.6
}

fn default_max_defrag_pages() -> u64 {
    64
}

fn default_max_pipeline_depth() -> usize {
    512
}

fn default_peer_timeout_ms() -> u64 {
    5_000
}

fn default_route_partitions() -> u64 {
    512
}

fn default_route_timeout_ms() -> u64 {
    2_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref bind) = overrides.bind {
            self.listener.bind = bind.clone();
        }
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref data_dir) = overrides.data_dir {
            self.storage.data_dir = data_dir.clone();
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        if self.storage.shard_count == 0 {
            anyhow::bail!("storage.shard_count must be > 0");
        }

        if !self.memory.max_memory_bytes.is_empty() {
            parse_size_bytes(&self.memory.max_memory_bytes)
                .with_context(|| "memory.max_memory_bytes")?;
        }

        crate::engine::eviction::EvictionPolicy::parse(&self.memory.eviction_policy)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "memory.eviction_policy is not a recognized policy: {}",
                    self.memory.eviction_policy
                )
            })?;

        if !(0.0..=1.0).contains(&self.memory.min_fragmentation_ratio) {
            anyhow::bail!("memory.min_fragmentation_ratio must be within [0, 1]");
        }

        if self.routes.partitions == 0 {
            anyhow::bail!("routes.partitions must be > 0");
        }

        for entry in &self.routes.entries {
            parse_route_entry(entry).with_context(|| format!("routes.entries: {}", entry))?;
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }

        Ok(())
    }

    /// Resolved memory budget in bytes; `u64::MAX` when unbounded.
    pub fn max_memory_bytes(&self) -> u64 {
        if self.memory.max_memory_bytes.is_empty() {
            u64::MAX
        } else {
            parse_size_bytes(&self.memory.max_memory_bytes).unwrap_or(u64::MAX)
        }
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override listener bind address.
    pub bind: Option<String>,
    /// Override log level.
    pub log_level: Option<String>,
    /// Override snapshot directory.
    pub data_dir: Option<String>,
}

/// Parse a byte size with optional k/m/g suffix (binary multiples).
pub fn parse_size_bytes(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("empty size");
    }
    let (digits, multiplier) = match s.as_bytes()[s.len() - 1].to_ascii_lowercase() {
        b'k' => (&s[..s.len() - 1], 1024u64),
        b'm' => (&s[..s.len() - 1], 1024 * 1024),
        b'g' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let n: u64 = digits
        .trim()
        .parse()
        .with_context(|| format!("invalid size: {}", s))?;
    n.checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("size overflows u64: {}", s))
}

/// Parse a "partition=host:port" route entry.
pub fn parse_route_entry(s: &str) -> Result<(u64, std::net::SocketAddr)> {
    let (partition, addr) = s
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("expected partition=host:port"))?;
    let partition: u64 = partition
        .trim()
        .parse()
        .with_context(|| format!("invalid partition id: {}", partition))?;
    let addr: std::net::SocketAddr = addr
        .trim()
        .parse()
        .with_context(|| format!("invalid address: {}", addr))?;
    Ok((partition, addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_memory_bytes(), u64::MAX);
    }

    #[test]
    fn test_parse_size_suffixes() {
        assert_eq!(parse_size_bytes("100").unwrap(), 100);
        assert_eq!(parse_size_bytes("64k").unwrap(), 64 * 1024);
        assert_eq!(parse_size_bytes("100m").unwrap(), 100 * 1024 * 1024);
        assert_eq!(parse_size_bytes("1G").unwrap(), 1024 * 1024 * 1024);
        assert!(parse_size_bytes("ten").is_err());
        assert!(parse_size_bytes("").is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml(
            r#"
[storage]
shard_count = 4

[memory]
max_memory_bytes = "10m"
eviction_policy = "allkeys-lru"

[listener]
bind = "127.0.0.1:6543"
"#,
        )
        .unwrap();

        assert_eq!(config.storage.shard_count, 4);
        assert_eq!(config.max_memory_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.listener.bind, "127.0.0.1:6543");
    }

    #[test]
    fn test_bad_policy_rejected() {
        let result = Config::from_toml(
            r#"
[memory]
eviction_policy = "sometimes"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_route_entry_parsing() {
        let (partition, addr) = parse_route_entry("7=127.0.0.1:6500").unwrap();
        assert_eq!(partition, 7);
        assert_eq!(addr.port(), 6500);
        assert!(parse_route_entry("x=y").is_err());
        assert!(parse_route_entry("12").is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = Config::default();
        config.apply_overrides(&ConfigOverrides {
            bind: Some("0.0.0.0:7000".to_string()),
            log_level: Some("debug".to_string()),
            data_dir: None,
        });
        assert_eq!(config.listener.bind, "0.0.0.0:7000");
        assert_eq!(config.telemetry.log_level, "debug");
    }
}
