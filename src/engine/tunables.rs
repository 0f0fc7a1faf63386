//! Runtime-mutable configuration.
//!
//! The subset of [`crate::core::config::Config`] that `CONFIG SET` may
//! change while the store is running. Everything else (shard count,
//! bind address, data directory) is fixed at startup.

use crate::core::config::{parse_size_bytes, Config};
use crate::core::error::{StrataError, StrataResult};
use crate::engine::eviction::EvictionPolicy;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Runtime-mutable knobs shared by the shards and the governor.
pub struct Tunables {
    max_memory_bytes: AtomicU64,
    maintenance_poll_ms: AtomicU64,
    active_defrag: AtomicBool,
    min_fragmentation_ratio: AtomicU64, // f32 bits
    max_defrag_pages: AtomicU64,
    save_interval_ms: AtomicU64,
    policy: RwLock<EvictionPolicy>,
}

impl Tunables {
    pub fn from_config(config: &Config) -> Self {
        let policy = EvictionPolicy::parse(&config.memory.eviction_policy)
            .unwrap_or(EvictionPolicy::None);
        Self {
            max_memory_bytes: AtomicU64::new(config.max_memory_bytes()),
            maintenance_poll_ms: AtomicU64::new(config.memory.maintenance_poll_ms),
            active_defrag: AtomicBool::new(config.memory.active_defrag),
            min_fragmentation_ratio: AtomicU64::new(
                config.memory.min_fragmentation_ratio.to_bits() as u64
            ),
            max_defrag_pages: AtomicU64::new(config.memory.max_defrag_pages),
            save_interval_ms: AtomicU64::new(config.storage.save_interval_ms),
            policy: RwLock::new(policy),
        }
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_bytes.load(Ordering::Relaxed)
    }

    pub fn maintenance_poll_ms(&self) -> u64 {
        self.maintenance_poll_ms.load(Ordering::Relaxed)
    }

    pub fn active_defrag(&self) -> bool {
        self.active_defrag.load(Ordering::Relaxed)
    }

    pub fn min_fragmentation_ratio(&self) -> f32 {
        f32::from_bits(self.min_fragmentation_ratio.load(Ordering::Relaxed) as u32)
    }

    pub fn max_defrag_pages(&self) -> u64 {
        self.max_defrag_pages.load(Ordering::Relaxed)
    }

    pub fn save_interval_ms(&self) -> u64 {
        self.save_interval_ms.load(Ordering::Relaxed)
    }

    pub fn policy(&self) -> EvictionPolicy {
        *self.policy.read()
    }

    /// Set a knob by its configuration name. Accepts the same value
    /// syntax as the TOML file ("100m", "allkeys-lru", "on"/"off").
    pub fn set(&self, name: &str, value: &str) -> StrataResult<()> {
        match name {
            "max_memory_bytes" => {
                let bytes = parse_size_bytes(value)
                    .map_err(|e| StrataError::invalid(e.to_string()))?;
                self.max_memory_bytes.store(bytes, Ordering::Relaxed);
            }
            "eviction_policy" => {
                let policy = EvictionPolicy::parse(value)
                    .ok_or_else(|| StrataError::invalid(format!("unknown policy: {}", value)))?;
                *self.policy.write() = policy;
            }
            "maintenance_poll_ms" | "maintenance_poll_delay" => {
                let ms: u64 = value
                    .parse()
                    .map_err(|_| StrataError::invalid(format!("invalid delay: {}", value)))?;
                self.maintenance_poll_ms.store(ms.max(1), Ordering::Relaxed);
            }
            "active_defrag" => {
                let on = parse_bool(value)?;
                self.active_defrag.store(on, Ordering::Relaxed);
            }
            "min_fragmentation_ratio" => {
                let ratio: f32 = value
                    .parse()
                    .map_err(|_| StrataError::invalid(format!("invalid ratio: {}", value)))?;
                if !(0.0..=1.0).contains(&ratio) {
                    return Err(StrataError::invalid("ratio must be within [0, 1]"));
                }
                self.min_fragmentation_ratio
                    .store(ratio.to_bits() as u64, Ordering::Relaxed);
            }
            "max_defrag_pages" => {
                let pages: u64 = value
                    .parse()
                    .map_err(|_| StrataError::invalid(format!("invalid page count: {}", value)))?;
                self.max_defrag_pages.store(pages, Ordering::Relaxed);
            }
            "save_interval_ms" => {
                let ms: u64 = value
                    .parse()
                    .map_err(|_| StrataError::invalid(format!("invalid interval: {}", value)))?;
                self.save_interval_ms.store(ms, Ordering::Relaxed);
            }
            _ => {
                return Err(StrataError::invalid(format!(
                    "unknown configuration parameter: {}",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Read a knob by name, rendered as a string.
    pub fn get(&self, name: &str) -> Option<String> {
        match name {
            "max_memory_bytes" => Some(self.max_memory_bytes().to_string()),
            "eviction_policy" => Some(self.policy().to_string()),
            "maintenance_poll_ms" | "maintenance_poll_delay" => {
                Some(self.maintenance_poll_ms().to_string())
            }
            "active_defrag" => Some(if self.active_defrag() { "on" } else { "off" }.to_string()),
            "min_fragmentation_ratio" => Some(format!("{}", self.min_fragmentation_ratio())),
            "max_defrag_pages" => Some(self.max_defrag_pages().to_string()),
            "save_interval_ms" => Some(self.save_interval_ms().to_string()),
            _ => None,
        }
    }

    /// All knobs as (name, value) pairs, for `CONFIG GET *`.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        [
            "max_memory_bytes",
            "eviction_policy",
            "maintenance_poll_ms",
            "active_defrag",
            "min_fragmentation_ratio",
            "max_defrag_pages",
            "save_interval_ms",
        ]
        .into_iter()
        .filter_map(|name| self.get(name).map(|v| (name, v)))
        .collect()
    }
}

fn parse_bool(value: &str) -> StrataResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        other => Err(StrataError::invalid(format!("invalid boolean: {}", other))),
    }
}
