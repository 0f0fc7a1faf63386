//! Per-shard expiration queue.
//!
//! A min-heap over (deadline, key) with lazy invalidation: replacing
//! or removing a key leaves its old heap entry behind, and collection
//! validates each popped entry against the live deadline map. This
//! keeps scheduling O(log n) without heap surgery.

use std::collections::{BinaryHeap, HashMap};

#[derive(Debug, Clone, Eq, PartialEq)]
struct ExpiryEntry {
    deadline_ms: u64,
    key: Vec<u8>,
}

impl Ord for ExpiryEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline_ms
            .cmp(&self.deadline_ms)
            .then_with(|| other.key.cmp(&self.key))
    }
}

impl PartialOrd for ExpiryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue for proactive expiry sweeps.
#[derive(Debug, Default)]
pub struct ExpiryQueue {
    heap: BinaryHeap<ExpiryEntry>,
    deadlines: HashMap<Vec<u8>, u64>,
}

impl ExpiryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule or reschedule a key.
    pub fn schedule(&mut self, key: Vec<u8>, deadline_ms: u64) {
        self.deadlines.insert(key.clone(), deadline_ms);
        self.heap.push(ExpiryEntry { deadline_ms, key });
    }

    /// Cancel a key's deadline (key deleted or TTL cleared).
    pub fn cancel(&mut self, key: &[u8]) -> bool {
        self.deadlines.remove(key).is_some()
    }

    /// Pop up to `max` keys whose deadline is at or before `now_ms`.
    pub fn collect_expired(&mut self, now_ms: u64, max: usize) -> Vec<Vec<u8>> {
        let mut expired = Vec::new();

        while expired.len() < max {
            let Some(head) = self.heap.peek() else { break };

            // Skip stale entries from replaced or cancelled deadlines.
            if self.deadlines.get(&head.key).copied() != Some(head.deadline_ms) {
                self.heap.pop();
                continue;
            }

            if head.deadline_ms <= now_ms {
                let entry = self.heap.pop().expect("peeked entry");
                self.deadlines.remove(&entry.key);
                expired.push(entry.key);
            } else {
                break;
            }
        }

        expired
    }

    /// Number of keys with a pending deadline.
    pub fn depth(&self) -> usize {
        self.deadlines.len()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.deadlines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_in_deadline_order() {
        let mut q = ExpiryQueue::new();
        q.schedule(b"late".to_vec(), 300);
        q.schedule(b"early".to_vec(), 100);
        q.schedule(b"mid".to_vec(), 200);

        let expired = q.collect_expired(250, 16);
        assert_eq!(expired, vec![b"early".to_vec(), b"mid".to_vec()]);
        assert_eq!(q.depth(), 1);
    }

    #[test]
    fn test_reschedule_invalidates_old_entry() {
        let mut q = ExpiryQueue::new();
        q.schedule(b"k".to_vec(), 100);
        q.schedule(b"k".to_vec(), 500);

        assert!(q.collect_expired(200, 16).is_empty());
        let expired = q.collect_expired(500, 16);
        assert_eq!(expired, vec![b"k".to_vec()]);
    }

    #[test]
    fn test_cancel() {
        let mut q = ExpiryQueue::new();
        q.schedule(b"k".to_vec(), 100);
        assert!(q.cancel(b"k"));
        assert!(!q.cancel(b"k"));
        assert!(q.collect_expired(1000, 16).is_empty());
        assert_eq!(q.depth(), 0);
    }

    #[test]
    fn test_bounded_collection() {
        let mut q = ExpiryQueue::new();
        for i in 0..10u8 {
            q.schedule(vec![i], 50);
        }
        let first = q.collect_expired(100, 4);
        assert_eq!(first.len(), 4);
        let rest = q.collect_expired(100, 100);
        assert_eq!(rest.len(), 6);
    }
}
