//! Eviction policy selection.
//!
//! The configurable policy is a closed set of strategies chosen at
//! configuration time. Candidate picking itself lives with the shard,
//! which owns the index; this module only names the strategies and
//! parses their configuration strings.

use std::fmt;

/// Which entries a policy may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionScope {
    /// Every entry is a candidate.
    AllKeys,
    /// Only entries carrying a TTL are candidates.
    Volatile,
}

/// Eviction policy, selected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Never evict; over-budget writes are rejected.
    None,
    /// Least-recently-used approximation, lowest access tick first.
    Lru(EvictionScope),
    /// Least-frequently-used approximation, lowest counter first.
    Lfu(EvictionScope),
    /// Uniformly sampled key from the affected shard.
    Random(EvictionScope),
    /// Entries nearest expiration first. Volatile by definition.
    TtlBiased,
}

impl EvictionPolicy {
    /// Parse a configuration string ("allkeys-lru", "volatile-ttl", ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "noeviction" => Some(Self::None),
            "allkeys-lru" => Some(Self::Lru(EvictionScope::AllKeys)),
            "volatile-lru" => Some(Self::Lru(EvictionScope::Volatile)),
            "allkeys-lfu" => Some(Self::Lfu(EvictionScope::AllKeys)),
            "volatile-lfu" => Some(Self::Lfu(EvictionScope::Volatile)),
            "allkeys-random" => Some(Self::Random(EvictionScope::AllKeys)),
            "volatile-random" => Some(Self::Random(EvictionScope::Volatile)),
            "volatile-ttl" => Some(Self::TtlBiased),
            _ => None,
        }
    }

    /// True when the policy can evict at all.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// The scope this policy restricts candidates to.
    pub fn scope(&self) -> EvictionScope {
        match self {
            Self::None => EvictionScope::AllKeys,
            Self::Lru(s) | Self::Lfu(s) | Self::Random(s) => *s,
            Self::TtlBiased => EvictionScope::Volatile,
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Lru(EvictionScope::AllKeys) => "allkeys-lru",
            Self::Lru(EvictionScope::Volatile) => "volatile-lru",
            Self::Lfu(EvictionScope::AllKeys) => "allkeys-lfu",
            Self::Lfu(EvictionScope::Volatile) => "volatile-lfu",
            Self::Random(EvictionScope::AllKeys) => "allkeys-random",
            Self::Random(EvictionScope::Volatile) => "volatile-random",
            Self::TtlBiased => "volatile-ttl",
        };
        write!(f, "{}", s)
    }
}
