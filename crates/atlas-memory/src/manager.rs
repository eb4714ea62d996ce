//! The per-session memory manager.

use std::sync::Arc;

use atlas_core::messages::{ChatMessage, Role};
use tracing::debug;

use crate::longterm::LongTermMemory;
use crate::preferences::{extract_signals, label_for};
use crate::working::WorkingMemory;

/// Deployment-wide memory tuning. One instance is shared by every session;
/// capacities and decay are never per-session.
#[derive(Clone, Debug)]
pub struct MemoryConfig {
    /// Exchanges kept verbatim in working memory.
    pub working_capacity: usize,
    /// Hard cap on long-term entries.
    pub long_term_capacity: usize,
    /// Multiplier applied to every long-term score per recorded exchange.
    pub decay_rate: f64,
    /// Entries decaying below this are pruned outright.
    pub score_floor: f64,
    /// Minimum score for an entry to appear in a built context.
    pub relevance_threshold: f64,
    /// Most long-term entries ever rendered into one context.
    pub context_entries: usize,
    /// City names eligible for preference detection.
    pub known_cities: Vec<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            working_capacity: 10,
            long_term_capacity: 50,
            decay_rate: 0.9,
            score_floor: 0.05,
            relevance_threshold: 0.3,
            context_entries: 5,
            known_cities: Vec::new(),
        }
    }
}

/// Both memory tiers for one session, plus context assembly.
pub struct SessionMemory {
    config: Arc<MemoryConfig>,
    working: WorkingMemory,
    long_term: LongTermMemory,
}

impl SessionMemory {
    pub fn new(config: Arc<MemoryConfig>) -> Self {
        Self {
            working: WorkingMemory::new(config.working_capacity),
            long_term: LongTermMemory::new(),
            config,
        }
    }

    /// Reconstruct memory state by replaying a persisted message history in
    /// order. Unpaired trailing messages are ignored.
    pub fn rebuild(config: Arc<MemoryConfig>, history: &[ChatMessage]) -> Self {
        let mut memory = Self::new(config);
        let mut pending_user: Option<&str> = None;
        for message in history {
            match message.role {
                Role::User => pending_user = Some(&message.content),
                Role::Assistant => {
                    if let Some(user) = pending_user.take() {
                        memory.record_exchange(user, &message.content);
                    }
                }
                Role::System => {}
            }
        }
        memory
    }

    /// Record a completed exchange: append to working memory, age the
    /// long-term store, then upsert any durable signals found in the user
    /// message. Never fails; a message with no recognizable signals simply
    /// leaves long-term memory decayed.
    pub fn record_exchange(&mut self, user: &str, assistant: &str) {
        self.working.record(user, assistant);

        self.long_term
            .decay(self.config.decay_rate, self.config.score_floor);
        let signals = extract_signals(user, &self.config.known_cities);
        if !signals.is_empty() {
            debug!(count = signals.len(), "extracted preference signals");
        }
        for signal in signals {
            self.long_term.upsert(signal.key, signal.value);
        }
        self.long_term
            .enforce_capacity(self.config.long_term_capacity);
    }

    /// Assemble the model context: system preamble, remembered preferences
    /// (strongest first), then working memory in chronological order.
    pub fn build_context(&self, preamble: &str) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(preamble)];
        if let Some(summary) = self.preference_summary() {
            messages.push(ChatMessage::system(summary));
        }
        messages.extend(self.working.messages());
        messages
    }

    /// Rendered block of the currently relevant long-term entries, or
    /// `None` when nothing clears the threshold.
    pub fn preference_summary(&self) -> Option<String> {
        let hits = self
            .long_term
            .relevant(self.config.relevance_threshold, self.config.context_entries);
        if hits.is_empty() {
            return None;
        }
        let mut lines = vec!["已知用户偏好：".to_string()];
        for (key, entry) in hits {
            lines.push(format!("- {}：{}", label_for(key), entry.value));
        }
        Some(lines.join("\n"))
    }

    pub fn working(&self) -> &WorkingMemory {
        &self.working
    }

    pub fn long_term(&self) -> &LongTermMemory {
        &self.long_term
    }
}
