//! The session API behind the HTTP surface.
//!
//! `AgentService` validates requests, claims the session's turn slot and
//! spawns the reasoning turn as a background task. The caller gets the
//! turn's event receiver back immediately; everything downstream of
//! validation is reported through events, not errors.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use atlas_core::events::{TurnEmitter, TurnEvent};
use atlas_core::ids::SessionId;
use atlas_engine::{TurnRequest, TurnRunner};
use atlas_llm::{ModelCatalog, ModelSummary};
use atlas_store::MessageRow;
use serde::Serialize;

use crate::error::ServiceError;
use crate::sessions::{SessionManager, SessionSummary};

/// Name given to sessions created without one. A session still carrying it
/// is renamed from the first message it receives.
pub const DEFAULT_SESSION_NAME: &str = "新会话";

/// Characters of the first message used for the derived session name.
const AUTO_NAME_CHARS: usize = 20;

/// Per-turn event channel depth. A slow SSE consumer backpressures the
/// engine through this buffer rather than dropping events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One session with its full message history.
#[derive(Debug, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: SessionSummary,
    pub messages: Vec<MessageRow>,
}

/// A session's model selection as the API reports it.
#[derive(Debug, Serialize)]
pub struct SessionModel {
    pub model: String,
    pub display_name: String,
}

pub struct AgentService {
    manager: Arc<SessionManager>,
    runner: Arc<TurnRunner>,
    catalog: Arc<ModelCatalog>,
}

impl AgentService {
    pub fn new(
        manager: Arc<SessionManager>,
        runner: Arc<TurnRunner>,
        catalog: Arc<ModelCatalog>,
    ) -> Self {
        Self {
            manager,
            runner,
            catalog,
        }
    }

    #[instrument(skip(self))]
    pub fn create_session(
        &self,
        name: Option<&str>,
        model: Option<&str>,
    ) -> Result<SessionSummary, ServiceError> {
        let model = match model {
            Some(id) if !self.catalog.contains(id) => {
                return Err(ServiceError::UnknownModel(id.to_string()))
            }
            Some(id) => id,
            None => self.catalog.default_id(),
        };
        let name = match name.map(str::trim) {
            Some(n) if !n.is_empty() => n,
            _ => DEFAULT_SESSION_NAME,
        };
        let row = self.manager.create(name, model)?;
        info!(session_id = %row.id, model, "session created");
        Ok(SessionSummary::from_row(row, 0))
    }

    pub fn list_sessions(&self, include_empty: bool) -> Result<Vec<SessionSummary>, ServiceError> {
        Ok(self.manager.list(include_empty)?)
    }

    pub fn session_detail(&self, id: &SessionId) -> Result<SessionDetail, ServiceError> {
        let row = self.manager.session(id)?;
        let messages = self.manager.history(id)?;
        let count = messages.len() as u64;
        Ok(SessionDetail {
            session: SessionSummary::from_row(row, count),
            messages,
        })
    }

    pub fn rename_session(&self, id: &SessionId, name: &str) -> Result<(), ServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "session name must not be empty".into(),
            ));
        }
        Ok(self.manager.rename(id, name)?)
    }

    pub fn session_model(&self, id: &SessionId) -> Result<SessionModel, ServiceError> {
        let row = self.manager.session(id)?;
        // A model can drop out of the catalog across a config change; the
        // stored id is still reported, just without a display name.
        let display_name = self
            .catalog
            .get(&row.model)
            .map(|d| d.display_name.clone())
            .unwrap_or_else(|| row.model.clone());
        Ok(SessionModel {
            model: row.model,
            display_name,
        })
    }

    pub fn set_session_model(&self, id: &SessionId, model: &str) -> Result<(), ServiceError> {
        if !self.catalog.contains(model) {
            return Err(ServiceError::UnknownModel(model.to_string()));
        }
        Ok(self.manager.set_model(id, model)?)
    }

    pub fn list_models(&self) -> Vec<ModelSummary> {
        self.catalog.list()
    }

    pub fn clear_session(&self, id: &SessionId) -> Result<u64, ServiceError> {
        Ok(self.manager.clear(id)?)
    }

    pub fn delete_session(&self, id: &SessionId) -> Result<(), ServiceError> {
        Ok(self.manager.delete(id)?)
    }

    /// Signal the session's in-flight turn, if any.
    pub fn cancel_turn(&self, id: &SessionId) -> bool {
        self.manager.cancel_turn(id)
    }

    /// Validate and launch one turn, returning its event stream.
    ///
    /// The turn slot is claimed before this returns, so a second call for
    /// the same session fails with `SessionBusy` until the spawned turn
    /// finishes. The first event on the receiver is always `session_id`.
    #[instrument(skip(self, message), fields(session_id = %id))]
    pub fn send_message(
        &self,
        id: &SessionId,
        message: &str,
    ) -> Result<mpsc::Receiver<TurnEvent>, ServiceError> {
        let text = message.trim();
        if text.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "message must not be empty".into(),
            ));
        }

        let session = self.manager.session(id)?;
        let guard = self.manager.begin_turn(id)?;
        let memory = self.manager.memory(id)?;

        // First message into a still-unnamed session names it.
        if session.name == DEFAULT_SESSION_NAME && self.manager.message_count(id)? == 0 {
            let derived: String = text.chars().take(AUTO_NAME_CHARS).collect();
            if let Err(e) = self.manager.rename(id, &derived) {
                warn!(error = %e, "auto-naming failed");
            }
        }

        let model = match self.catalog.get(&session.model) {
            Some(descriptor) => descriptor.clone(),
            None => {
                warn!(model = %session.model, "session model not in catalog, using default");
                self.catalog.default_model().clone()
            }
        };

        let (mut emitter, rx) = TurnEmitter::channel(EVENT_CHANNEL_CAPACITY);
        let runner = Arc::clone(&self.runner);
        let session_id = id.clone();
        let user_input = text.to_string();

        tokio::spawn(async move {
            emitter.session_id(session_id.clone()).await;
            let mut memory = memory.lock().await;
            let request = TurnRequest {
                session_id,
                user_input,
                model,
                memory: &mut memory,
                emitter: &mut emitter,
                cancel: guard.cancel_token(),
            };
            // Outcome logging and the terminal error event are the runner's.
            let _ = runner.run(request).await;
            // Free the slot before the event channel closes, so a client
            // that saw the stream end can immediately start the next turn.
            drop(guard);
        });

        Ok(rx)
    }
}
