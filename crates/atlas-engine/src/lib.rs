//! Reasoning engine: the decision loop, the travel tool set and the
//! streamed answer phase.
//!
//! [`TurnRunner`] drives one turn end to end against any
//! [`CompletionClient`](atlas_core::provider::CompletionClient): it streams
//! decision output as reasoning events, executes the chosen tools through
//! the [`ToolRegistry`], folds every failure into an Observation, and
//! finishes with a streamed answer that is recorded to memory and the store
//! before `done` goes out.

pub mod error;
pub mod knowledge;
pub mod parser;
pub mod prompts;
pub mod react;
pub mod registry;
pub mod tools;
pub mod transcript;

pub use error::EngineError;
pub use knowledge::TravelKnowledge;
pub use react::{EngineConfig, TurnOutcome, TurnRequest, TurnRunner, TurnStore};
pub use registry::ToolRegistry;
pub use tools::register_travel_tools;
pub use transcript::{ActionRecord, ReasoningStep};
