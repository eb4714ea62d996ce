//! Per-session runtime state on top of the store: cached memories and
//! in-flight turn tracking.
//!
//! One turn per session at a time. The busy slot is claimed atomically by
//! [`SessionManager::begin_turn`] and released only by the returned guard's
//! destructor — `cancel_turn` signals the token but leaves the slot claimed,
//! so a cancelled turn stays busy until its task actually unwinds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use atlas_core::ids::SessionId;
use atlas_core::messages::ChatMessage;
use atlas_memory::{MemoryConfig, SessionMemory};
use atlas_store::{Database, MessageRepo, MessageRow, SessionRepo, SessionRow, StoreError};

use crate::error::ServiceError;

/// One session as the HTTP surface reports it.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub name: String,
    pub model: String,
    pub message_count: u64,
    pub created_at: String,
    pub updated_at: String,
}

impl SessionSummary {
    pub(crate) fn from_row(row: SessionRow, message_count: u64) -> Self {
        Self {
            id: row.id,
            name: row.name,
            model: row.model,
            message_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

struct ActiveTurn {
    cancel: CancellationToken,
    started_at: Instant,
}

/// Releases the session's busy slot when the turn task finishes, normally
/// or not. Held by the spawned turn task, never by handlers.
pub struct TurnGuard {
    active: Arc<DashMap<SessionId, ActiveTurn>>,
    session_id: SessionId,
    cancel: CancellationToken,
}

impl TurnGuard {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.active.remove(&self.session_id);
        debug!(session_id = %self.session_id, "turn slot released");
    }
}

/// Store facade plus the runtime state the store cannot hold: per-session
/// memory caches and the set of sessions with a turn in flight.
pub struct SessionManager {
    sessions: SessionRepo,
    messages: MessageRepo,
    memory_config: Arc<MemoryConfig>,
    memories: DashMap<SessionId, Arc<Mutex<SessionMemory>>>,
    active: Arc<DashMap<SessionId, ActiveTurn>>,
    recency_window: chrono::Duration,
}

impl SessionManager {
    pub fn new(db: Database, memory_config: MemoryConfig, recency_window: chrono::Duration) -> Self {
        Self {
            sessions: SessionRepo::new(db.clone()),
            messages: MessageRepo::new(db),
            memory_config: Arc::new(memory_config),
            memories: DashMap::new(),
            active: Arc::new(DashMap::new()),
            recency_window,
        }
    }

    pub fn create(&self, name: &str, model: &str) -> Result<SessionRow, StoreError> {
        self.sessions.create(name, model)
    }

    pub fn session(&self, id: &SessionId) -> Result<SessionRow, StoreError> {
        self.sessions.get(id)
    }

    pub fn history(&self, id: &SessionId) -> Result<Vec<MessageRow>, StoreError> {
        self.messages.for_session(id)
    }

    pub fn message_count(&self, id: &SessionId) -> Result<u64, StoreError> {
        self.messages.count(id)
    }

    /// Sessions worth showing: anything with history, plus empty sessions
    /// still inside the recency window (the one the client just created and
    /// hasn't typed into yet). `include_empty` disables the filter.
    pub fn list(&self, include_empty: bool) -> Result<Vec<SessionSummary>, StoreError> {
        let now = Utc::now();
        let rows = self.sessions.list_with_counts()?;
        Ok(rows
            .into_iter()
            .filter(|(row, count)| {
                include_empty || *count > 0 || self.is_recent(&row.created_at, now)
            })
            .map(|(row, count)| SessionSummary::from_row(row, count))
            .collect())
    }

    fn is_recent(&self, created_at: &str, now: DateTime<Utc>) -> bool {
        match DateTime::parse_from_rfc3339(created_at) {
            Ok(ts) => now.signed_duration_since(ts.with_timezone(&Utc)) <= self.recency_window,
            Err(_) => false,
        }
    }

    pub fn rename(&self, id: &SessionId, name: &str) -> Result<(), StoreError> {
        self.sessions.rename(id, name)
    }

    pub fn set_model(&self, id: &SessionId, model: &str) -> Result<(), StoreError> {
        self.sessions.set_model(id, model)
    }

    /// Wipe history and forget the cached memory; the session row survives.
    /// The next turn starts from a blank memory.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn clear(&self, id: &SessionId) -> Result<u64, StoreError> {
        self.sessions.get(id)?;
        let deleted = self.messages.delete_for_session(id)?;
        self.memories.remove(id);
        info!(deleted, "session history cleared");
        Ok(deleted)
    }

    /// Hard delete. Any in-flight turn is cancelled first.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        self.cancel_turn(id);
        self.sessions.delete(id)?;
        self.memories.remove(id);
        Ok(())
    }

    /// The session's memory, rebuilt from persisted history on first access.
    pub fn memory(&self, id: &SessionId) -> Result<Arc<Mutex<SessionMemory>>, StoreError> {
        if let Some(entry) = self.memories.get(id) {
            return Ok(Arc::clone(&entry));
        }
        let history = self.history(id)?;
        let replayed: Vec<ChatMessage> = history
            .iter()
            .map(|row| ChatMessage {
                role: row.role,
                content: row.content.clone(),
            })
            .collect();
        debug!(session_id = %id, messages = replayed.len(), "rebuilding session memory");
        let rebuilt = SessionMemory::rebuild(Arc::clone(&self.memory_config), &replayed);
        let entry = self
            .memories
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(rebuilt)));
        Ok(Arc::clone(&entry))
    }

    /// Claim the session's busy slot, or fail with `SessionBusy`.
    pub fn begin_turn(&self, id: &SessionId) -> Result<TurnGuard, ServiceError> {
        match self.active.entry(id.clone()) {
            Entry::Occupied(_) => Err(ServiceError::SessionBusy(id.to_string())),
            Entry::Vacant(slot) => {
                let cancel = CancellationToken::new();
                slot.insert(ActiveTurn {
                    cancel: cancel.clone(),
                    started_at: Instant::now(),
                });
                Ok(TurnGuard {
                    active: Arc::clone(&self.active),
                    session_id: id.clone(),
                    cancel,
                })
            }
        }
    }

    /// Signal the in-flight turn, if any. Returns whether one was running.
    pub fn cancel_turn(&self, id: &SessionId) -> bool {
        match self.active.get(id) {
            Some(run) => {
                info!(
                    session_id = %id,
                    elapsed_ms = run.started_at.elapsed().as_millis() as u64,
                    "cancelling in-flight turn"
                );
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, id: &SessionId) -> bool {
        self.active.contains_key(id)
    }

    /// Drop empty sessions untouched for `expiry` and evict their cached
    /// memories. Returns the reaped ids.
    pub fn reap_stale(&self, expiry: chrono::Duration) -> Result<Vec<SessionId>, StoreError> {
        let reaped = self.sessions.reap_empty_before(Utc::now() - expiry)?;
        for id in &reaped {
            self.memories.remove(id);
        }
        if !reaped.is_empty() {
            info!(count = reaped.len(), "reaped stale empty sessions");
        }
        Ok(reaped)
    }
}

/// Periodic reaper for abandoned empty sessions.
pub fn start_reaper(
    manager: Arc<SessionManager>,
    interval: Duration,
    expiry: chrono::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = manager.reap_stale(expiry) {
                tracing::warn!(error = %e, "session reap failed");
            }
        }
    })
}
