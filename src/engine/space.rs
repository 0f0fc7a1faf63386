//! A space: named keyspace partitioned across shards, with dependency
//! edges to other spaces.
//!
//! Dependency edges implement read-miss fallback by lookup chaining,
//! not data copying. Reads lock the child shard first and consult
//! parents strictly afterwards as read-only lookups; that fixed order
//! keeps mutually-dependent spaces from deadlocking. Edges are held
//! weakly so a registry drop is authoritative.

use crate::core::error::{StrataError, StrataResult};
use crate::engine::eviction::{EvictionPolicy, EvictionScope};
use crate::engine::shard::{ListEnd, SetOptions, SetOutcome, Shard, TtlState};
use crate::engine::stats::EngineStats;
use crate::engine::tunables::Tunables;
use crate::engine::value::{Value, ValueRepr};
use parking_lot::RwLock;
use std::collections::{HashSet, VecDeque};
use std::hash::Hasher;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use twox_hash::XxHash64;

/// Observes successful mutations for replication fan-out.
///
/// The publish path and the local write path share nothing but this
/// hand-off; delivery happens on the peers' own queues.
pub trait MutationObserver: Send + Sync {
    fn key_added(&self, space: &str, key: &[u8], value: ValueRepr, expires_at: Option<u64>);
    fn key_removed(&self, space: &str, key: &[u8]);
}

/// Tri-state for per-space eviction option overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptionToggle {
    On,
    #[default]
    Off,
    Volatile,
}

impl OptionToggle {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ON" => Some(Self::On),
            "OFF" => Some(Self::Off),
            "VOLATILE" => Some(Self::Volatile),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Volatile => "VOLATILE",
        }
    }

    fn scope(&self) -> EvictionScope {
        match self {
            Self::Volatile => EvictionScope::Volatile,
            _ => EvictionScope::AllKeys,
        }
    }
}

/// Per-space options, settable over the wire.
#[derive(Debug, Clone, Copy)]
pub struct SpaceOptions {
    /// Whether ordered scans (RANGE, COUNT, KEYS, MIN/MAX/LB) are
    /// served. Spaces used purely as hash caches switch this off.
    pub ordered: bool,
    /// LRU eviction override for this space.
    pub lru: OptionToggle,
    /// Random eviction override for this space.
    pub random: OptionToggle,
}

impl Default for SpaceOptions {
    fn default() -> Self {
        Self {
            ordered: true,
            lru: OptionToggle::Off,
            random: OptionToggle::Off,
        }
    }
}

struct DepEdge {
    name: String,
    space: Weak<Space>,
}

/// A named keyspace over a fixed set of shards.
pub struct Space {
    name: String,
    shards: Vec<Arc<Shard>>,
    deps: RwLock<Vec<DepEdge>>,
    options: RwLock<SpaceOptions>,
    observer: RwLock<Option<Arc<dyn MutationObserver>>>,
    /// Keys removed in this space while dependency edges exist. A
    /// tombstoned key is absent through this space even when a parent
    /// still holds it; the parent's own copy is untouched.
    tombstones: RwLock<HashSet<Vec<u8>>>,
    /// Woken on every list push, for blocking pops.
    list_activity: Notify,
}

impl Space {
    pub fn new(
        name: String,
        shard_count: usize,
        stats: Arc<EngineStats>,
        tunables: Arc<Tunables>,
    ) -> Self {
        let shards = (0..shard_count)
            .map(|i| Arc::new(Shard::new(i, Arc::clone(&stats), Arc::clone(&tunables))))
            .collect();
        Self {
            name,
            shards,
            deps: RwLock::new(Vec::new()),
            options: RwLock::new(SpaceOptions::default()),
            observer: RwLock::new(None),
            tombstones: RwLock::new(HashSet::new()),
            list_activity: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shards(&self) -> &[Arc<Shard>] {
        &self.shards
    }

    pub fn shard(&self, index: usize) -> Option<&Arc<Shard>> {
        self.shards.get(index)
    }

    pub fn options(&self) -> SpaceOptions {
        *self.options.read()
    }

    pub fn set_ordered(&self, on: bool) {
        self.options.write().ordered = on;
    }

    pub fn set_lru(&self, toggle: OptionToggle) {
        let mut options = self.options.write();
        options.lru = toggle;
        if toggle != OptionToggle::Off {
            options.random = OptionToggle::Off;
        }
    }

    pub fn set_random(&self, toggle: OptionToggle) {
        let mut options = self.options.write();
        options.random = toggle;
        if toggle != OptionToggle::Off {
            options.lru = OptionToggle::Off;
        }
    }

    /// Eviction policy for this space's shards: the per-space override
    /// when set, the global policy otherwise.
    pub fn effective_policy(&self, global: EvictionPolicy) -> EvictionPolicy {
        let options = self.options.read();
        if options.lru != OptionToggle::Off {
            EvictionPolicy::Lru(options.lru.scope())
        } else if options.random != OptionToggle::Off {
            EvictionPolicy::Random(options.random.scope())
        } else {
            global
        }
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn MutationObserver>>) {
        *self.observer.write() = observer;
    }

    /// Stable shard index for a key.
    pub fn shard_index(&self, key: &[u8]) -> usize {
        if self.shards.len() == 1 {
            return 0;
        }
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(key);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    pub fn shard_for(&self, key: &[u8]) -> &Arc<Shard> {
        &self.shards[self.shard_index(key)]
    }

    // ------------------------------------------------------------------
    // Dependency edges
    // ------------------------------------------------------------------

    pub fn add_dependency(&self, parent: &Arc<Space>) -> StrataResult<()> {
        if parent.name == self.name {
            return Err(StrataError::invalid("a space cannot depend on itself"));
        }
        let mut deps = self.deps.write();
        if deps.iter().any(|edge| edge.name == parent.name) {
            return Ok(()); // idempotent
        }
        deps.push(DepEdge {
            name: parent.name.clone(),
            space: Arc::downgrade(parent),
        });
        Ok(())
    }

    /// Remove the edge to `parent`. Returns false when no such edge.
    pub fn release_dependency(&self, parent: &str) -> bool {
        let mut deps = self.deps.write();
        let before = deps.len();
        deps.retain(|edge| edge.name != parent);
        deps.len() != before
    }

    pub fn dependency_names(&self) -> Vec<String> {
        self.deps.read().iter().map(|e| e.name.clone()).collect()
    }

    pub fn clear_dependencies(&self) {
        self.deps.write().clear();
    }

    /// Direct parents, insertion order, dropped spaces skipped.
    fn parents(&self) -> Vec<Arc<Space>> {
        self.deps
            .read()
            .iter()
            .filter_map(|edge| edge.space.upgrade())
            .collect()
    }

    /// True when parents may serve this key (no tombstone shadows it).
    fn parents_visible(&self, key: &[u8]) -> bool {
        let tombstones = self.tombstones.read();
        tombstones.is_empty() || !tombstones.contains(key)
    }

    /// A write to this space revives any tombstoned key.
    fn clear_tombstone(&self, key: &[u8]) {
        if !self.tombstones.read().is_empty() {
            self.tombstones.write().remove(key);
        }
    }

    /// Transitive dependency chain in breadth-first insertion order,
    /// cycle-safe. Does not include this space.
    pub fn chain(&self) -> Vec<Arc<Space>> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(self.name.clone());
        let mut queue: VecDeque<Arc<Space>> = self.parents().into();
        let mut out = Vec::new();
        while let Some(parent) = queue.pop_front() {
            if visited.insert(parent.name.clone()) {
                queue.extend(parent.parents());
                out.push(parent);
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Reads (dependency-aware)
    // ------------------------------------------------------------------

    /// Scalar lookup with dependency fallback.
    pub fn get(&self, key: &[u8]) -> StrataResult<Option<Vec<u8>>> {
        if let Some(value) = self.shard_for(key).get(key)? {
            return Ok(Some(value));
        }
        if !self.parents_visible(key) {
            return Ok(None);
        }
        for parent in self.chain() {
            match parent.shard_for(key).fetch(key) {
                Some(Value::Scalar(b)) => return Ok(Some(b)),
                Some(_) => return Err(StrataError::TypeMismatch),
                None => continue,
            }
        }
        Ok(None)
    }

    /// Any-kind lookup with dependency fallback.
    pub fn fetch(&self, key: &[u8]) -> Option<Value> {
        if let Some(value) = self.shard_for(key).fetch(key) {
            return Some(value);
        }
        if !self.parents_visible(key) {
            return None;
        }
        self.chain()
            .into_iter()
            .find_map(|parent| parent.shard_for(key).fetch(key))
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.shard_for(key).exists(key)
            || (self.parents_visible(key)
                && self
                    .chain()
                    .into_iter()
                    .any(|parent| parent.shard_for(key).exists(key)))
    }

    pub fn ttl(&self, key: &[u8]) -> TtlState {
        match self.shard_for(key).ttl(key) {
            TtlState::NotFound => {}
            state => return state,
        }
        if !self.parents_visible(key) {
            return TtlState::NotFound;
        }
        for parent in self.chain() {
            match parent.shard_for(key).ttl(key) {
                TtlState::NotFound => continue,
                state => return state,
            }
        }
        TtlState::NotFound
    }

    fn require_ordered(&self) -> StrataResult<()> {
        if self.options.read().ordered {
            Ok(())
        } else {
            Err(StrataError::invalid("space is not ordered"))
        }
    }

    /// Range scan across this space and its dependency chain; the
    /// first space to define a key wins, and tombstoned keys never
    /// surface from parents.
    pub fn range(
        &self,
        begin: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> StrataResult<Vec<(Vec<u8>, Value)>> {
        self.require_ordered()?;
        let mut merged: std::collections::BTreeMap<Vec<u8>, Value> =
            std::collections::BTreeMap::new();
        for (key, value) in self.collect_range(begin, end, limit) {
            merged.entry(key).or_insert(value);
        }
        for parent in self.chain() {
            for (key, value) in parent.collect_range(begin, end, limit) {
                if self.parents_visible(&key) {
                    merged.entry(key).or_insert(value);
                }
            }
        }
        Ok(merged.into_iter().take(limit).collect())
    }

    fn collect_range(&self, begin: &[u8], end: Option<&[u8]>, limit: usize) -> Vec<(Vec<u8>, Value)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            out.extend(shard.range(begin, end, limit));
        }
        out
    }

    pub fn count(&self, begin: &[u8], end: Option<&[u8]>) -> StrataResult<usize> {
        self.require_ordered()?;
        let chain = self.chain();
        if chain.is_empty() {
            return Ok(self.shards.iter().map(|s| s.count(begin, end)).sum());
        }
        // Shadow-aware: count distinct keys across the chain.
        let mut seen: HashSet<Vec<u8>> = HashSet::new();
        for (key, _) in self.collect_range(begin, end, usize::MAX) {
            seen.insert(key);
        }
        for parent in chain {
            for (key, _) in parent.collect_range(begin, end, usize::MAX) {
                if self.parents_visible(&key) {
                    seen.insert(key);
                }
            }
        }
        Ok(seen.len())
    }

    /// Live entries in this space plus its dependency chain.
    pub fn len(&self) -> usize {
        let chain = self.chain();
        if chain.is_empty() {
            return self.shards.iter().map(|s| s.len()).sum();
        }
        let mut seen: HashSet<Vec<u8>> = HashSet::new();
        for key in self.collect_keys() {
            seen.insert(key);
        }
        for parent in chain {
            for key in parent.collect_keys() {
                if self.parents_visible(&key) {
                    seen.insert(key);
                }
            }
        }
        seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live entries in this space alone (no dependency chain).
    pub fn own_len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    fn collect_keys(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for shard in &self.shards {
            out.extend(
                shard
                    .range(b"", None, usize::MAX)
                    .into_iter()
                    .map(|(key, _)| key),
            );
        }
        out
    }

    pub fn keys_matching(&self, pattern: &[u8]) -> StrataResult<Vec<Vec<u8>>> {
        self.require_ordered()?;
        let mut merged: std::collections::BTreeSet<Vec<u8>> = std::collections::BTreeSet::new();
        for shard in &self.shards {
            merged.extend(shard.keys_matching(pattern));
        }
        for parent in self.chain() {
            for shard in &parent.shards {
                merged.extend(
                    shard
                        .keys_matching(pattern)
                        .into_iter()
                        .filter(|key| self.parents_visible(key)),
                );
            }
        }
        Ok(merged.into_iter().collect())
    }

    pub fn values_matching(&self, pattern: &[u8]) -> StrataResult<Vec<(Vec<u8>, Value)>> {
        self.require_ordered()?;
        let mut merged: std::collections::BTreeMap<Vec<u8>, Value> =
            std::collections::BTreeMap::new();
        for shard in &self.shards {
            for (key, value) in shard.values_matching(pattern) {
                merged.entry(key).or_insert(value);
            }
        }
        for parent in self.chain() {
            for shard in &parent.shards {
                for (key, value) in shard.values_matching(pattern) {
                    if self.parents_visible(&key) {
                        merged.entry(key).or_insert(value);
                    }
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    pub fn min_key(&self) -> StrataResult<Option<Vec<u8>>> {
        self.require_ordered()?;
        let mut best: Option<Vec<u8>> = None;
        for shard in self
            .shards
            .iter()
            .chain(self.chain().iter().flat_map(|p| {
                // Parents contribute read-only.
                p.shards.iter()
            }))
        {
            if let Some(candidate) = shard.min_key() {
                best = match best {
                    Some(current) if current <= candidate => Some(current),
                    _ => Some(candidate),
                };
            }
        }
        Ok(best)
    }

    pub fn max_key(&self) -> StrataResult<Option<Vec<u8>>> {
        self.require_ordered()?;
        let mut best: Option<Vec<u8>> = None;
        for shard in self
            .shards
            .iter()
            .chain(self.chain().iter().flat_map(|p| p.shards.iter()))
        {
            if let Some(candidate) = shard.max_key() {
                best = match best {
                    Some(current) if current >= candidate => Some(current),
                    _ => Some(candidate),
                };
            }
        }
        Ok(best)
    }

    pub fn lower_bound(&self, key: &[u8]) -> StrataResult<Option<Vec<u8>>> {
        self.require_ordered()?;
        let mut best: Option<Vec<u8>> = None;
        for shard in self
            .shards
            .iter()
            .chain(self.chain().iter().flat_map(|p| p.shards.iter()))
        {
            if let Some(candidate) = shard.lower_bound(key) {
                best = match best {
                    Some(current) if current <= candidate => Some(current),
                    _ => Some(candidate),
                };
            }
        }
        Ok(best)
    }

    // ------------------------------------------------------------------
    // Writes (observer-published)
    // ------------------------------------------------------------------

    pub fn set(&self, key: &[u8], value: Value, opts: SetOptions) -> StrataResult<SetOutcome> {
        let outcome = self.shard_for(key).set(key, value, opts)?;
        if outcome.inserted {
            self.clear_tombstone(key);
            self.publish_added(key);
        }
        Ok(outcome)
    }

    /// Remove a key. While dependency edges exist, the removal also
    /// shadows any parent copy of the key.
    pub fn remove(&self, key: &[u8]) -> bool {
        let removed = self.shard_for(key).remove(key);
        if !self.deps.read().is_empty() {
            self.tombstones.write().insert(key.to_vec());
        }
        if removed {
            self.publish_removed(key);
        }
        removed
    }

    pub fn incr_by(&self, key: &[u8], delta: i64) -> StrataResult<i64> {
        let next = self.shard_for(key).incr_by(key, delta)?;
        self.clear_tombstone(key);
        self.publish_added(key);
        Ok(next)
    }

    pub fn splice(&self, key: &[u8], bytes: &[u8], end: ListEnd) -> StrataResult<u64> {
        let len = self.shard_for(key).splice(key, bytes, end)?;
        self.clear_tombstone(key);
        self.publish_added(key);
        Ok(len)
    }

    pub fn expire(&self, key: &[u8], secs: u64) -> bool {
        let set = self.shard_for(key).expire(key, secs);
        if set {
            self.publish_added(key);
        }
        set
    }

    pub fn list_push(&self, key: &[u8], values: Vec<Vec<u8>>, end: ListEnd) -> StrataResult<u64> {
        let len = self.shard_for(key).list_push(key, values, end)?;
        self.clear_tombstone(key);
        self.publish_added(key);
        self.list_activity.notify_waiters();
        Ok(len)
    }

    pub fn list_pop(&self, key: &[u8], count: usize, end: ListEnd) -> StrataResult<Vec<Vec<u8>>> {
        let popped = self.shard_for(key).list_pop(key, count, end)?;
        if !popped.is_empty() {
            self.publish_list_state(key);
        }
        Ok(popped)
    }

    pub fn list_len(&self, key: &[u8]) -> StrataResult<u64> {
        match self.shard_for(key).list_len(key)? {
            0 if self.parents_visible(key) => {
                for parent in self.chain() {
                    let len = parent.shard_for(key).list_len(key)?;
                    if len > 0 {
                        return Ok(len);
                    }
                }
                Ok(0)
            }
            len => Ok(len),
        }
    }

    pub fn list_front(&self, key: &[u8]) -> StrataResult<Option<Vec<u8>>> {
        if let Some(v) = self.shard_for(key).list_front(key)? {
            return Ok(Some(v));
        }
        if !self.parents_visible(key) {
            return Ok(None);
        }
        for parent in self.chain() {
            if let Some(v) = parent.shard_for(key).list_front(key)? {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    pub fn list_back(&self, key: &[u8]) -> StrataResult<Option<Vec<u8>>> {
        if let Some(v) = self.shard_for(key).list_back(key)? {
            return Ok(Some(v));
        }
        if !self.parents_visible(key) {
            return Ok(None);
        }
        for parent in self.chain() {
            if let Some(v) = parent.shard_for(key).list_back(key)? {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    /// Blocking pop over multiple keys, first-ready-wins. A zero or
    /// elapsed timeout degrades to a non-blocking probe.
    pub async fn blocking_pop(
        &self,
        keys: &[Vec<u8>],
        end: ListEnd,
        timeout: Duration,
    ) -> StrataResult<Option<(Vec<u8>, Vec<u8>)>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before probing so a concurrent push
            // between probe and await cannot be missed.
            let notified = self.list_activity.notified();

            for key in keys {
                let mut popped = self.list_pop(key, 1, end)?;
                if let Some(value) = popped.pop() {
                    return Ok(Some((key.clone(), value)));
                }
            }

            let now = tokio::time::Instant::now();
            if timeout.is_zero() || now >= deadline {
                return Ok(None);
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    pub fn sorted_add(&self, key: &[u8], pairs: Vec<(f64, Vec<u8>)>) -> StrataResult<u64> {
        let added = self.shard_for(key).sorted_add(key, pairs)?;
        self.clear_tombstone(key);
        self.publish_added(key);
        Ok(added)
    }

    pub fn sorted_range_by_score(
        &self,
        key: &[u8],
        min: f64,
        max: f64,
    ) -> StrataResult<Vec<(f64, Vec<u8>)>> {
        let own = self.shard_for(key).sorted_range_by_score(key, min, max)?;
        if !own.is_empty() || self.shard_for(key).exists(key) || !self.parents_visible(key) {
            return Ok(own);
        }
        for parent in self.chain() {
            let hits = parent.shard_for(key).sorted_range_by_score(key, min, max)?;
            if !hits.is_empty() || parent.shard_for(key).exists(key) {
                return Ok(hits);
            }
        }
        Ok(own)
    }

    pub fn sorted_card(&self, key: &[u8]) -> StrataResult<u64> {
        let own = self.shard_for(key).sorted_card(key)?;
        if own > 0 || self.shard_for(key).exists(key) || !self.parents_visible(key) {
            return Ok(own);
        }
        for parent in self.chain() {
            let card = parent.shard_for(key).sorted_card(key)?;
            if card > 0 {
                return Ok(card);
            }
        }
        Ok(0)
    }

    /// Drop every entry in this space. Dependency edges survive;
    /// delete shadows do not.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.clear();
        }
        self.tombstones.write().clear();
    }

    // ------------------------------------------------------------------
    // Replication apply path
    // ------------------------------------------------------------------

    /// Apply a replicated or pulled add without re-publishing.
    pub fn apply_add(
        &self,
        key: &[u8],
        value: ValueRepr,
        expires_at: Option<u64>,
    ) -> StrataResult<bool> {
        let is_list = matches!(value, ValueRepr::List(_));
        let applied = self.shard_for(key).apply_add(key, value, expires_at)?;
        if applied {
            self.clear_tombstone(key);
            if is_list {
                self.list_activity.notify_waiters();
            }
        }
        Ok(applied)
    }

    /// Apply a replicated remove without re-publishing.
    pub fn apply_remove(&self, key: &[u8]) -> bool {
        self.shard_for(key).apply_remove(key)
    }

    /// Drain this space's delete shadows. Merge turns them into real
    /// removals on the target.
    pub fn take_tombstones(&self) -> Vec<Vec<u8>> {
        self.tombstones.write().drain().collect()
    }

    // ------------------------------------------------------------------

    fn publish_added(&self, key: &[u8]) {
        let observer = self.observer.read();
        if let Some(observer) = observer.as_ref() {
            if let Some((repr, expires_at)) = self.shard_for(key).repr_of(key) {
                observer.key_added(&self.name, key, repr, expires_at);
            }
        }
    }

    fn publish_removed(&self, key: &[u8]) {
        let observer = self.observer.read();
        if let Some(observer) = observer.as_ref() {
            observer.key_removed(&self.name, key);
        }
    }

    /// After a pop, broadcast the remaining list (or the removal when
    /// the pop emptied it).
    fn publish_list_state(&self, key: &[u8]) {
        let observer = self.observer.read();
        if let Some(observer) = observer.as_ref() {
            match self.shard_for(key).repr_of(key) {
                Some((repr, expires_at)) => observer.key_added(&self.name, key, repr, expires_at),
                None => observer.key_removed(&self.name, key),
            }
        }
    }
}
