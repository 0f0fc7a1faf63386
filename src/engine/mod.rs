//! Storage engine: shards, spaces, memory governance.

pub mod eviction;
pub mod expiry;
pub mod governor;
pub mod pattern;
pub mod registry;
pub mod shard;
pub mod space;
pub mod stats;
pub mod tunables;
pub mod value;

pub use eviction::{EvictionPolicy, EvictionScope};
pub use governor::{GovernorPhase, MemoryGovernor};
pub use registry::{SpaceRegistry, DEFAULT_SPACE};
pub use shard::{ListEnd, SetOptions, Shard, TtlState};
pub use space::{MutationObserver, OptionToggle, Space, SpaceOptions};
pub use stats::{EngineStats, StatsSnapshot};
pub use tunables::Tunables;
pub use value::{Entry, SortedSet, Value, ValueRepr};
