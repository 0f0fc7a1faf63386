//! Strata - embeddable, network-addressable key-value store.
//!
//! Strata stores scalar byte strings, lists, and ordered sets in
//! named, mergeable keyspaces ("spaces"), each partitioned across a
//! fixed set of independently-locked shards. A background memory
//! governor enforces a byte budget through configurable eviction and
//! bounded defragmentation; per-key expiry is checked lazily on access
//! and swept proactively. Replication runs in two independent modes —
//! push-broadcast of local mutations to subscribed peers, and
//! pull-on-demand read-through from a source node — and a partition
//! router tries remote nodes first with local fallback.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    RESP Listener (server)                   │
//! │       command sessions  │  inbound replication streams      │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//! ┌─────────────────────────────────────────────────────────────┐
//! │     Router (remote-first, local fallback)  │  Puller        │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//! ┌─────────────────────────────────────────────────────────────┐
//! │   Space Registry → Spaces → Shards (ordered indexes)        │
//! │        dependency chaining │ destructive merge              │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//! ┌─────────────────────────────────────────────────────────────┐
//! │   Memory Governor (sweep / evict / defrag)  │  Publisher    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::error`] - Error taxonomy and wire mapping
//! - [`engine`] - Shards, spaces, eviction, the governor
//! - [`repl`] - Publish, inbound apply, pull
//! - [`route`] - Partition routing with local fallback
//! - [`resp`] - RESP protocol values, codec, client
//! - [`server`] - Listener and command dispatch
//! - [`snapshot`] - Space snapshots on disk
//! - [`store`] - The embeddable `Store` handle
//!
//! # Key Invariants
//!
//! - A space's shard count never changes while the space exists.
//! - A key holds one value kind at a time; mismatches error, never
//!   coerce.
//! - Cross-space reads lock child shards before consulting parents.
//! - Replication is best-effort and at-most-once; local writes never
//!   roll back on peer failure.

pub mod core;
pub mod engine;
pub mod repl;
pub mod resp;
pub mod route;
pub mod server;
pub mod snapshot;
pub mod store;

pub use self::core::{config, error, time};
pub use engine::{
    EvictionPolicy, ListEnd, MemoryGovernor, SetOptions, Space, SpaceRegistry, TtlState, Value,
    DEFAULT_SPACE,
};
pub use store::Store;
