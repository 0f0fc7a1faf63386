//! Value slots and entry metadata.
//!
//! A key holds exactly one kind of value at a time; operations against
//! the wrong kind fail with `TypeMismatch` and never coerce.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Fixed bookkeeping cost charged per entry, on top of key and value
/// payload bytes.
pub const ENTRY_OVERHEAD: u64 = 64;

/// Per-element cost charged for list and sorted-set members.
pub const ELEMENT_OVERHEAD: u64 = 16;

/// A value slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Scalar byte string.
    Scalar(Vec<u8>),
    /// Double-ended list of byte strings.
    List(VecDeque<Vec<u8>>),
    /// Ordered set of (score, member) pairs.
    Sorted(SortedSet),
}

impl Value {
    pub fn scalar(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Scalar(bytes.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::List(_) => "list",
            Self::Sorted(_) => "sorted",
        }
    }

    /// Logical payload bytes, including per-element overhead.
    pub fn cost(&self) -> u64 {
        match self {
            Self::Scalar(b) => b.len() as u64,
            Self::List(items) => items
                .iter()
                .map(|i| i.len() as u64 + ELEMENT_OVERHEAD)
                .sum(),
            Self::Sorted(set) => set
                .members
                .keys()
                .map(|m| m.len() as u64 + 8 + ELEMENT_OVERHEAD)
                .sum(),
        }
    }

    /// Allocated capacity bytes, for fragmentation accounting.
    pub fn capacity(&self) -> u64 {
        match self {
            Self::Scalar(b) => b.capacity() as u64,
            Self::List(items) => items
                .iter()
                .map(|i| i.capacity() as u64 + ELEMENT_OVERHEAD)
                .sum(),
            // Sorted sets rehash on their own schedule; report payload.
            Self::Sorted(_) => self.cost(),
        }
    }

    /// Release capacity slack. Returns bytes reclaimed.
    pub fn compact(&mut self) -> u64 {
        let before = self.capacity();
        match self {
            Self::Scalar(b) => b.shrink_to_fit(),
            Self::List(items) => {
                for item in items.iter_mut() {
                    item.shrink_to_fit();
                }
                items.shrink_to_fit();
            }
            Self::Sorted(_) => {}
        }
        before.saturating_sub(self.capacity())
    }
}

/// Ordered set of (score, member) pairs.
///
/// Maintains a by-member map for point updates and a by-score index
/// for range queries. Scores use f64 total ordering, so NaN sorts
/// deterministically rather than corrupting the index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedSet {
    members: HashMap<Vec<u8>, f64>,
    by_score: BTreeSet<(ScoreKey, Vec<u8>)>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a member. Returns true when the member was new.
    pub fn insert(&mut self, score: f64, member: Vec<u8>) -> bool {
        match self.members.insert(member.clone(), score) {
            Some(old) => {
                self.by_score.remove(&(ScoreKey(old), member.clone()));
                self.by_score.insert((ScoreKey(score), member));
                false
            }
            None => {
                self.by_score.insert((ScoreKey(score), member));
                true
            }
        }
    }

    /// Remove a member. Returns true when it was present.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.members.remove(member) {
            Some(score) => {
                self.by_score.remove(&(ScoreKey(score), member.to_vec()));
                true
            }
            None => false,
        }
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.members.get(member).copied()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members with min ≤ score ≤ max, ascending by (score, member).
    pub fn range_by_score(&self, min: f64, max: f64) -> Vec<(f64, Vec<u8>)> {
        self.by_score
            .range((ScoreKey(min), Vec::new())..)
            .take_while(|(score, _)| score.0 <= max)
            .map(|(score, member)| (score.0, member.clone()))
            .collect()
    }

    /// All pairs ascending, for snapshots and replication.
    pub fn pairs(&self) -> Vec<(f64, Vec<u8>)> {
        self.by_score
            .iter()
            .map(|(score, member)| (score.0, member.clone()))
            .collect()
    }

    pub fn from_pairs(pairs: Vec<(f64, Vec<u8>)>) -> Self {
        let mut set = Self::new();
        for (score, member) in pairs {
            set.insert(score, member);
        }
        set
    }
}

/// f64 wrapper with total ordering, usable as a BTreeSet key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreKey(pub f64);

impl Eq for ScoreKey {}

impl PartialOrd for ScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoreKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Entry: a value slot plus expiry and eviction metadata.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    /// Absolute expiry deadline in unix millis.
    pub expires_at: Option<u64>,
    /// Last access in unix millis, for LRU scoring.
    pub last_access: u64,
    /// Saturating access counter, for LFU scoring.
    pub frequency: u32,
}

impl Entry {
    pub fn new(value: Value, now: u64) -> Self {
        Self {
            value,
            expires_at: None,
            last_access: now,
            frequency: 1,
        }
    }

    pub fn touch(&mut self, now: u64) {
        self.last_access = now;
        self.frequency = self.frequency.saturating_add(1);
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    /// Logical bytes charged for this entry under the given key.
    pub fn cost(&self, key: &[u8]) -> u64 {
        key.len() as u64 + self.value.cost() + ENTRY_OVERHEAD
    }
}

/// Serializable value representation used by snapshots and
/// replication instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueRepr {
    Scalar(Vec<u8>),
    List(Vec<Vec<u8>>),
    Sorted(Vec<(f64, Vec<u8>)>),
}

impl From<&Value> for ValueRepr {
    fn from(value: &Value) -> Self {
        match value {
            Value::Scalar(b) => Self::Scalar(b.clone()),
            Value::List(items) => Self::List(items.iter().cloned().collect()),
            Value::Sorted(set) => Self::Sorted(set.pairs()),
        }
    }
}

impl From<ValueRepr> for Value {
    fn from(repr: ValueRepr) -> Self {
        match repr {
            ValueRepr::Scalar(b) => Self::Scalar(b),
            ValueRepr::List(items) => Self::List(items.into()),
            ValueRepr::Sorted(pairs) => Self::Sorted(SortedSet::from_pairs(pairs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_set_insert_update() {
        let mut set = SortedSet::new();
        assert!(set.insert(1.0, b"a".to_vec()));
        assert!(set.insert(2.0, b"b".to_vec()));
        assert!(!set.insert(3.0, b"a".to_vec()));
        assert_eq!(set.len(), 2);
        assert_eq!(set.score(b"a"), Some(3.0));
    }

    #[test]
    fn test_sorted_set_range_by_score() {
        let mut set = SortedSet::new();
        set.insert(1.0, b"one".to_vec());
        set.insert(2.0, b"two".to_vec());
        set.insert(2.0, b"two-b".to_vec());
        set.insert(5.0, b"five".to_vec());

        let hits = set.range_by_score(2.0, 4.0);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].1, b"two");
        assert_eq!(hits[1].1, b"two-b");
    }

    #[test]
    fn test_sorted_set_remove() {
        let mut set = SortedSet::new();
        set.insert(1.0, b"a".to_vec());
        assert!(set.remove(b"a"));
        assert!(!set.remove(b"a"));
        assert!(set.is_empty());
        assert!(set.range_by_score(f64::MIN, f64::MAX).is_empty());
    }

    #[test]
    fn test_entry_expiry() {
        let mut entry = Entry::new(Value::scalar("v"), 1000);
        assert!(!entry.is_expired(2000));
        entry.expires_at = Some(1500);
        assert!(entry.is_expired(1500));
        assert!(entry.is_expired(2000));
        assert!(!entry.is_expired(1499));
    }

    #[test]
    fn test_value_compact_reclaims_slack() {
        let mut buf = Vec::with_capacity(1024);
        buf.extend_from_slice(b"abc");
        let mut value = Value::Scalar(buf);
        assert!(value.capacity() >= 1024);
        let reclaimed = value.compact();
        assert!(reclaimed > 0);
        assert!(value.capacity() < 1024);
    }

    #[test]
    fn test_value_repr_round_trip() {
        let mut set = SortedSet::new();
        set.insert(1.5, b"m".to_vec());
        for value in [
            Value::scalar("s"),
            Value::List(vec![b"a".to_vec(), b"b".to_vec()].into()),
            Value::Sorted(set),
        ] {
            let repr = ValueRepr::from(&value);
            let back: Value = repr.into();
            assert_eq!(back, value);
        }
    }
}
