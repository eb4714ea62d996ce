//! Working memory: the last N exchanges, verbatim.

use std::collections::VecDeque;

use atlas_core::messages::ChatMessage;
use chrono::{DateTime, Utc};

/// One completed user/assistant round trip.
#[derive(Clone, Debug, PartialEq)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
    pub at: DateTime<Utc>,
}

/// Bounded FIFO of recent exchanges. Once capacity is reached the oldest
/// pair is discarded whole — a user message never survives without its
/// answer.
#[derive(Clone, Debug)]
pub struct WorkingMemory {
    exchanges: VecDeque<Exchange>,
    capacity: usize,
}

impl WorkingMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            exchanges: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.exchanges.push_back(Exchange {
            user: user.into(),
            assistant: assistant.into(),
            at: Utc::now(),
        });
        while self.exchanges.len() > self.capacity {
            self.exchanges.pop_front();
        }
    }

    /// Chronological role-tagged messages for the model context.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.exchanges.len() * 2);
        for exchange in &self.exchanges {
            out.push(ChatMessage::user(&exchange.user));
            out.push(ChatMessage::assistant(&exchange.assistant));
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.iter()
    }

    pub fn latest(&self) -> Option<&Exchange> {
        self.exchanges.back()
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.exchanges.clear();
    }
}
