//! Process-wide space registry.
//!
//! Spaces are created on first reference and live until explicitly
//! dropped. Dropping a space that others still depend on is rejected;
//! the edges must be released first.

use crate::core::error::{StrataError, StrataResult};
use crate::engine::space::{MutationObserver, Space};
use crate::engine::stats::EngineStats;
use crate::engine::tunables::Tunables;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default space used by connections before any `USE`.
pub const DEFAULT_SPACE: &str = "default";

/// Maximum space name length accepted from the wire.
const MAX_SPACE_NAME: usize = 64;

/// Check a space name: non-empty, bounded, and free of separator
/// characters used by cross-space command addressing.
pub fn is_valid_space_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_SPACE_NAME
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
}

/// Process-wide table of named spaces.
pub struct SpaceRegistry {
    spaces: RwLock<BTreeMap<String, Arc<Space>>>,
    shard_count: usize,
    stats: Arc<EngineStats>,
    tunables: Arc<Tunables>,
    observer: RwLock<Option<Arc<dyn MutationObserver>>>,
}

impl SpaceRegistry {
    pub fn new(shard_count: usize, stats: Arc<EngineStats>, tunables: Arc<Tunables>) -> Self {
        Self {
            spaces: RwLock::new(BTreeMap::new()),
            shard_count,
            stats,
            tunables,
            observer: RwLock::new(None),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    pub fn tunables(&self) -> &Arc<Tunables> {
        &self.tunables
    }

    /// Install the replication observer on every current and future
    /// space.
    pub fn set_observer(&self, observer: Arc<dyn MutationObserver>) {
        *self.observer.write() = Some(Arc::clone(&observer));
        for space in self.spaces.read().values() {
            space.set_observer(Some(Arc::clone(&observer)));
        }
    }

    /// Get or create a space.
    pub fn open(&self, name: &str) -> StrataResult<Arc<Space>> {
        if !is_valid_space_name(name) {
            return Err(StrataError::invalid(format!(
                "invalid space name: {:?}",
                name
            )));
        }
        if let Some(space) = self.spaces.read().get(name) {
            return Ok(Arc::clone(space));
        }
        let mut spaces = self.spaces.write();
        // Double-checked: another writer may have created it.
        if let Some(space) = spaces.get(name) {
            return Ok(Arc::clone(space));
        }
        let space = Arc::new(Space::new(
            name.to_string(),
            self.shard_count,
            Arc::clone(&self.stats),
            Arc::clone(&self.tunables),
        ));
        if let Some(observer) = self.observer.read().as_ref() {
            space.set_observer(Some(Arc::clone(observer)));
        }
        spaces.insert(name.to_string(), Arc::clone(&space));
        tracing::debug!(space = name, shards = self.shard_count, "space created");
        Ok(space)
    }

    /// Existing space, or NotFound.
    pub fn get(&self, name: &str) -> StrataResult<Arc<Space>> {
        self.spaces
            .read()
            .get(name)
            .cloned()
            .ok_or(StrataError::NotFound)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.spaces.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.spaces.read().keys().cloned().collect()
    }

    pub fn spaces(&self) -> Vec<Arc<Space>> {
        self.spaces.read().values().cloned().collect()
    }

    /// Append a dependency edge: reads missing in `child` consult
    /// `parent`. Both are created on first reference.
    pub fn depends(&self, child: &str, parent: &str) -> StrataResult<()> {
        let parent_space = self.open(parent)?;
        let child_space = self.open(child)?;
        child_space.add_dependency(&parent_space)
    }

    /// Remove the `child` → `parent` edge.
    pub fn release(&self, parent: &str, child: &str) -> StrataResult<()> {
        let child_space = self.get(child)?;
        if child_space.release_dependency(parent) {
            Ok(())
        } else {
            Err(StrataError::invalid(format!(
                "space '{}' does not depend on '{}'",
                child, parent
            )))
        }
    }

    /// Names of spaces that hold a dependency edge to `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.spaces
            .read()
            .iter()
            .filter(|(space_name, space)| {
                space_name.as_str() != name
                    && space.dependency_names().iter().any(|dep| dep == name)
            })
            .map(|(space_name, _)| space_name.clone())
            .collect()
    }

    /// Destructive union of `src` into `into`: every entry physically
    /// present in src is written into the target, src wins on key
    /// collision, and src is left empty (but still registered).
    pub fn merge(&self, src: &str, into: &str) -> StrataResult<()> {
        if src == into {
            return Err(StrataError::SpaceInUse {
                message: "merge source and target are the same space".to_string(),
            });
        }
        let src_space = self.get(src)?;
        let into_space = self.get(into)?;

        for shard in src_space.shards() {
            // Drain one source shard at a time; never hold a source
            // and a target lock together.
            let entries = shard.drain_entries();
            for (key, repr, expires_at) in entries {
                into_space
                    .shard_for(&key)
                    .apply_add(&key, repr, expires_at)?;
            }
        }
        // Source-side delete shadows win too: a key removed in src
        // is removed from the target by the merge.
        for key in src_space.take_tombstones() {
            into_space.apply_remove(&key);
        }
        tracing::info!(src, into, "space merged");
        Ok(())
    }

    /// Delete a space and its shards. Rejected while any other space
    /// declares a dependency on it.
    pub fn drop_space(&self, name: &str) -> StrataResult<()> {
        let dependents = self.dependents_of(name);
        if !dependents.is_empty() {
            return Err(StrataError::DependencyViolation {
                space: name.to_string(),
            });
        }
        let removed = self.spaces.write().remove(name);
        match removed {
            Some(space) => {
                // Free the shard memory eagerly; the Arc may linger in
                // a concurrent reader for a moment.
                space.clear();
                space.clear_dependencies();
                tracing::info!(space = name, "space dropped");
                Ok(())
            }
            None => Err(StrataError::NotFound),
        }
    }

    /// Drop every entry in every space.
    pub fn clear_all(&self) {
        for space in self.spaces.read().values() {
            space.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::engine::shard::SetOptions;
    use crate::engine::value::Value;

    fn registry() -> SpaceRegistry {
        let stats = Arc::new(EngineStats::new());
        let tunables = Arc::new(Tunables::from_config(&Config::default()));
        SpaceRegistry::new(4, stats, tunables)
    }

    #[test]
    fn test_open_creates_once() {
        let r = registry();
        let a = r.open("alpha").unwrap();
        let b = r.open("alpha").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(r.exists("alpha"));
        assert_eq!(r.names(), vec!["alpha".to_string()]);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let r = registry();
        assert!(r.open("").is_err());
        assert!(r.open("with:colon").is_err());
        assert!(r.open("with space").is_err());
        assert!(r.open(&"x".repeat(65)).is_err());
        assert!(r.open("ok-name_1.x").is_ok());
    }

    #[test]
    fn test_depends_and_release() {
        let r = registry();
        r.depends("child", "parent").unwrap();
        assert_eq!(r.dependents_of("parent"), vec!["child".to_string()]);

        r.release("parent", "child").unwrap();
        assert!(r.dependents_of("parent").is_empty());
        assert!(r.release("parent", "child").is_err());
    }

    #[test]
    fn test_drop_rejected_until_released() {
        let r = registry();
        r.depends("child", "parent").unwrap();

        let err = r.drop_space("parent").unwrap_err();
        assert!(matches!(err, StrataError::DependencyViolation { .. }));
        assert!(r.exists("parent"));

        r.release("parent", "child").unwrap();
        r.drop_space("parent").unwrap();
        assert!(!r.exists("parent"));
        r.drop_space("child").unwrap();
    }

    #[test]
    fn test_drop_missing_space() {
        let r = registry();
        assert!(matches!(
            r.drop_space("ghost"),
            Err(StrataError::NotFound)
        ));
    }

    #[test]
    fn test_merge_src_wins_and_empties() {
        let r = registry();
        let src = r.open("src").unwrap();
        let dest = r.open("dest").unwrap();

        dest.set(b"a", Value::scalar("dest-a"), SetOptions::default())
            .unwrap();
        dest.set(b"b", Value::scalar("dest-b"), SetOptions::default())
            .unwrap();
        src.set(b"a", Value::scalar("src-a"), SetOptions::default())
            .unwrap();
        src.set(b"c", Value::scalar("src-c"), SetOptions::default())
            .unwrap();

        r.merge("src", "dest").unwrap();

        assert_eq!(dest.get(b"a").unwrap(), Some(b"src-a".to_vec()));
        assert_eq!(dest.get(b"b").unwrap(), Some(b"dest-b".to_vec()));
        assert_eq!(dest.get(b"c").unwrap(), Some(b"src-c".to_vec()));
        assert_eq!(src.own_len(), 0);
        assert!(r.exists("src"));
    }

    #[test]
    fn test_merge_into_self_rejected() {
        let r = registry();
        r.open("s").unwrap();
        assert!(matches!(
            r.merge("s", "s"),
            Err(StrataError::SpaceInUse { .. })
        ));
    }

    #[test]
    fn test_clear_all() {
        let r = registry();
        let a = r.open("a").unwrap();
        let b = r.open("b").unwrap();
        a.set(b"k", Value::scalar("v"), SetOptions::default()).unwrap();
        b.set(b"k", Value::scalar("v"), SetOptions::default()).unwrap();
        r.clear_all();
        assert_eq!(a.own_len(), 0);
        assert_eq!(b.own_len(), 0);
    }
}
