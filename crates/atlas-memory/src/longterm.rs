//! Long-term memory: durable preferences with exponential relevance decay.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// One remembered fact. Score starts at 1.0 and decays multiplicatively
/// with every subsequent exchange until the entry is pruned.
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryEntry {
    pub value: String,
    pub score: f64,
    pub updated_at: DateTime<Utc>,
}

/// Keyed store of extracted preferences.
///
/// Writes refresh the score to full relevance; [`LongTermMemory::decay`]
/// ages every entry and drops those below the floor, so an unmentioned
/// preference fades monotonically and eventually disappears.
#[derive(Clone, Debug, Default)]
pub struct LongTermMemory {
    entries: HashMap<String, MemoryEntry>,
}

impl LongTermMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a preference at full relevance.
    pub fn upsert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(
            key.into(),
            MemoryEntry {
                value: value.into(),
                score: 1.0,
                updated_at: Utc::now(),
            },
        );
    }

    /// Age every entry by `rate` and prune below `floor`.
    pub fn decay(&mut self, rate: f64, floor: f64) {
        for entry in self.entries.values_mut() {
            entry.score *= rate;
        }
        self.entries.retain(|_, entry| entry.score >= floor);
    }

    /// Evict the lowest-scoring entries until at most `capacity` remain.
    pub fn enforce_capacity(&mut self, capacity: usize) {
        while self.entries.len() > capacity {
            let weakest = self
                .entries
                .iter()
                .min_by(|(ka, a), (kb, b)| {
                    a.score
                        .partial_cmp(&b.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.updated_at.cmp(&b.updated_at))
                        .then_with(|| ka.cmp(kb))
                })
                .map(|(key, _)| key.clone());
            match weakest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Entries scoring at least `threshold`, strongest first, at most
    /// `limit`. Ties break toward the most recently updated.
    pub fn relevant(&self, threshold: f64, limit: usize) -> Vec<(&str, &MemoryEntry)> {
        let mut hits: Vec<(&str, &MemoryEntry)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.score >= threshold)
            .map(|(key, entry)| (key.as_str(), entry))
            .collect();
        hits.sort_by(|(ka, a), (kb, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
                .then_with(|| ka.cmp(kb))
        });
        hits.truncate(limit);
        hits
    }

    pub fn get(&self, key: &str) -> Option<&MemoryEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
