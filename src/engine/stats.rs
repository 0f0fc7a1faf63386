//! Process-wide engine statistics.
//!
//! All counters are monotonically increasing for the life of the
//! process except `logical_allocated`, which is a gauge maintained by
//! the shards as entries are created and destroyed. Snapshots of this
//! structure back the STATS and OPS wire commands.

use std::sync::atomic::{AtomicU64, Ordering};

/// Engine counters. One instance per store.
#[derive(Debug, Default)]
pub struct EngineStats {
    // Memory gauge and governance counters.
    pub logical_allocated: AtomicU64,
    pub keys_evicted: AtomicU64,
    pub keys_expired: AtomicU64,
    pub oom_avoided_inserts: AtomicU64,
    pub pages_defragged: AtomicU64,
    pub bytes_reclaimed: AtomicU64,
    pub sweeps: AtomicU64,
    pub eviction_stalls: AtomicU64,

    // Operation counters.
    pub get_ops: AtomicU64,
    pub set_ops: AtomicU64,
    pub delete_ops: AtomicU64,
    pub range_ops: AtomicU64,
    pub incr_ops: AtomicU64,
    pub update_ops: AtomicU64,
    pub list_ops: AtomicU64,
    pub sorted_ops: AtomicU64,
    pub expire_ops: AtomicU64,
    pub size_ops: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_allocated(&self, bytes: u64) {
        self.logical_allocated.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn sub_allocated(&self, bytes: u64) {
        // Saturating decrement; accounting drift must never wrap the gauge.
        let mut current = self.logical_allocated.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(bytes);
            match self.logical_allocated.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn allocated(&self) -> u64 {
        self.logical_allocated.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            logical_allocated: self.logical_allocated.load(Ordering::Relaxed),
            keys_evicted: self.keys_evicted.load(Ordering::Relaxed),
            keys_expired: self.keys_expired.load(Ordering::Relaxed),
            oom_avoided_inserts: self.oom_avoided_inserts.load(Ordering::Relaxed),
            pages_defragged: self.pages_defragged.load(Ordering::Relaxed),
            bytes_reclaimed: self.bytes_reclaimed.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            eviction_stalls: self.eviction_stalls.load(Ordering::Relaxed),
            get_ops: self.get_ops.load(Ordering::Relaxed),
            set_ops: self.set_ops.load(Ordering::Relaxed),
            delete_ops: self.delete_ops.load(Ordering::Relaxed),
            range_ops: self.range_ops.load(Ordering::Relaxed),
            incr_ops: self.incr_ops.load(Ordering::Relaxed),
            update_ops: self.update_ops.load(Ordering::Relaxed),
            list_ops: self.list_ops.load(Ordering::Relaxed),
            sorted_ops: self.sorted_ops.load(Ordering::Relaxed),
            expire_ops: self.expire_ops.load(Ordering::Relaxed),
            size_ops: self.size_ops.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time statistics copy.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub logical_allocated: u64,
    pub keys_evicted: u64,
    pub keys_expired: u64,
    pub oom_avoided_inserts: u64,
    pub pages_defragged: u64,
    pub bytes_reclaimed: u64,
    pub sweeps: u64,
    pub eviction_stalls: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    pub delete_ops: u64,
    pub range_ops: u64,
    pub incr_ops: u64,
    pub update_ops: u64,
    pub list_ops: u64,
    pub sorted_ops: u64,
    pub expire_ops: u64,
    pub size_ops: u64,
}

impl StatsSnapshot {
    /// Render as (name, value) pairs for the STATS command.
    pub fn fields(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("logical_allocated", self.logical_allocated),
            ("keys_evicted", self.keys_evicted),
            ("keys_expired", self.keys_expired),
            ("oom_avoided_inserts", self.oom_avoided_inserts),
            ("pages_defragged", self.pages_defragged),
            ("bytes_reclaimed", self.bytes_reclaimed),
            ("sweeps", self.sweeps),
            ("eviction_stalls", self.eviction_stalls),
        ]
    }

    /// Render as (name, value) pairs for the OPS command.
    pub fn op_fields(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("get_ops", self.get_ops),
            ("set_ops", self.set_ops),
            ("delete_ops", self.delete_ops),
            ("range_ops", self.range_ops),
            ("incr_ops", self.incr_ops),
            ("update_ops", self.update_ops),
            ("list_ops", self.list_ops),
            ("sorted_ops", self.sorted_ops),
            ("expire_ops", self.expire_ops),
            ("size_ops", self.size_ops),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocated_gauge_saturates() {
        let stats = EngineStats::new();
        stats.add_allocated(100);
        stats.sub_allocated(40);
        assert_eq!(stats.allocated(), 60);
        stats.sub_allocated(1000);
        assert_eq!(stats.allocated(), 0);
    }

    #[test]
    fn test_snapshot_fields() {
        let stats = EngineStats::new();
        stats.keys_evicted.fetch_add(3, Ordering::Relaxed);
        let snap = stats.snapshot();
        assert_eq!(snap.keys_evicted, 3);
        assert!(snap.fields().iter().any(|(n, v)| *n == "keys_evicted" && *v == 3));
    }
}
