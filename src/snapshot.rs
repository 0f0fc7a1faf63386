//! Space snapshots on disk.
//!
//! One bincode file per space under the data directory. Expiry
//! deadlines are absolute, so save → restart → load reproduces the
//! key set and values; entries whose deadline passed while the
//! process was down are dropped at load. Writes go through a
//! temporary file and a rename so a crash never leaves a torn
//! snapshot behind.

use crate::core::error::{StrataError, StrataResult};
use crate::engine::registry::SpaceRegistry;
use crate::engine::space::{OptionToggle, Space};
use crate::engine::value::ValueRepr;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SNAPSHOT_SUFFIX: &str = ".snapshot";

/// On-disk form of one space.
#[derive(Debug, Serialize, Deserialize)]
pub struct SpaceSnapshot {
    pub name: String,
    pub shard_count: usize,
    pub ordered: bool,
    pub lru: String,
    pub random: String,
    pub dependencies: Vec<String>,
    /// Entries per shard index at save time.
    pub shards: Vec<Vec<(Vec<u8>, ValueRepr, Option<u64>)>>,
}

impl SpaceSnapshot {
    pub fn capture(space: &Space) -> Self {
        let options = space.options();
        Self {
            name: space.name().to_string(),
            shard_count: space.shard_count(),
            ordered: options.ordered,
            lru: options.lru.as_str().to_string(),
            random: options.random.as_str().to_string(),
            dependencies: space.dependency_names(),
            shards: space
                .shards()
                .iter()
                .map(|shard| shard.export_entries())
                .collect(),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }
}

/// Snapshot file path for a space.
pub fn snapshot_path(dir: &Path, space: &str) -> PathBuf {
    dir.join(format!("{}{}", space, SNAPSHOT_SUFFIX))
}

/// Write one space to disk. Returns bytes written.
pub fn save_space(dir: &Path, space: &Space) -> StrataResult<u64> {
    std::fs::create_dir_all(dir)?;
    let snapshot = SpaceSnapshot::capture(space);
    let payload = bincode::serialize(&snapshot)
        .map_err(|e| StrataError::invalid(format!("snapshot encode failed: {}", e)))?;

    let path = snapshot_path(dir, space.name());
    let tmp = path.with_extension("snapshot.tmp");
    std::fs::write(&tmp, &payload)?;
    std::fs::rename(&tmp, &path)?;
    tracing::debug!(
        space = space.name(),
        bytes = payload.len(),
        entries = snapshot.entry_count(),
        "snapshot saved"
    );
    Ok(payload.len() as u64)
}

/// Load one space's entries and options from disk, if a snapshot
/// exists. Dependency edges are returned, not applied — the registry
/// wires them once every space is open.
pub fn load_space(dir: &Path, space: &Space) -> StrataResult<Option<Vec<String>>> {
    let path = snapshot_path(dir, space.name());
    let payload = match std::fs::read(&path) {
        Ok(payload) => payload,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let snapshot: SpaceSnapshot = bincode::deserialize(&payload)
        .map_err(|e| StrataError::invalid(format!("snapshot decode failed: {}", e)))?;

    space.set_ordered(snapshot.ordered);
    if let Some(toggle) = OptionToggle::parse(&snapshot.lru) {
        space.set_lru(toggle);
    }
    if let Some(toggle) = OptionToggle::parse(&snapshot.random) {
        space.set_random(toggle);
    }

    if snapshot.shard_count == space.shard_count() {
        for (shard, entries) in space.shards().iter().zip(snapshot.shards) {
            shard.import_entries(entries);
        }
    } else {
        // Shard count changed across restarts: re-partition by hash.
        for entries in snapshot.shards {
            for (key, value, expires_at) in entries {
                space.shard_for(&key).import_entries(vec![(key, value, expires_at)]);
            }
        }
    }

    Ok(Some(snapshot.dependencies))
}

/// Save every registered space.
pub fn save_all(dir: &Path, registry: &SpaceRegistry) -> StrataResult<u64> {
    let mut total = 0;
    for space in registry.spaces() {
        total += save_space(dir, &space)?;
    }
    Ok(total)
}

/// Open and load every snapshot in the data directory, then restore
/// dependency edges.
pub fn load_all(dir: &Path, registry: &SpaceRegistry) -> StrataResult<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut pending_edges: Vec<(String, Vec<String>)> = Vec::new();
    let mut loaded = 0;
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name
            .to_str()
            .and_then(|n| n.strip_suffix(SNAPSHOT_SUFFIX))
        else {
            continue;
        };
        let space = registry.open(name)?;
        if let Some(dependencies) = load_space(dir, &space)? {
            loaded += 1;
            if !dependencies.is_empty() {
                pending_edges.push((name.to_string(), dependencies));
            }
        }
    }

    for (child, parents) in pending_edges {
        for parent in parents {
            registry.depends(&child, &parent)?;
        }
    }

    Ok(loaded)
}
