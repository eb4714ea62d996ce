//! Dual-tier conversation memory.
//!
//! Each session owns one [`SessionMemory`]: a bounded FIFO of recent
//! exchanges (working memory) plus a decayed store of extracted durable
//! preferences (long-term memory). The manager assembles the context window
//! the reasoning loop sends to the model and records what happened after
//! each turn.

pub mod longterm;
pub mod manager;
pub mod preferences;
pub mod working;

pub use longterm::{LongTermMemory, MemoryEntry};
pub use manager::{MemoryConfig, SessionMemory};
pub use preferences::PreferenceSignal;
pub use working::{Exchange, WorkingMemory};
