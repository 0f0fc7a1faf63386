//! Replication engine: push publish, inbound apply, read-through pull.

pub mod apply;
pub mod instruction;
pub mod publisher;
pub mod puller;
pub mod stats;

pub use instruction::{Instruction, REPL_MAGIC};
pub use publisher::Publisher;
pub use puller::Puller;
pub use stats::{ReplSnapshot, ReplStats};
