use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::ids::SessionId;

/// Per-invocation context handed to a tool.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub session_id: SessionId,
    /// Cooperative cancellation; long handlers should observe it.
    pub abort_signal: CancellationToken,
}

impl ToolContext {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            abort_signal: CancellationToken::new(),
        }
    }
}

/// Declared shape of a tool, rendered into the reasoning prompt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema object: `{"type": "object", "required": [...], "properties": {...}}`.
    pub parameters: serde_json::Value,
}

/// Tool failures. All of these are recoverable: the engine folds them into
/// the next Observation instead of aborting the turn.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("tool timed out after {0:?}")]
    Timeout(Duration),
    #[error("tool cancelled")]
    Cancelled,
}

/// An executable domain action the reasoning engine can choose.
///
/// Handlers in this domain are pure data lookups; side effects are confined
/// to whatever the handler itself performs.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError>;
}
