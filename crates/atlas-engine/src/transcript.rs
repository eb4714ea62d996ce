//! Step records and their rendered transcript.
//!
//! The same rendering feeds two places: the prompt for the next decision or
//! the final answer, and the `reasoning` column persisted alongside the
//! assistant message.

use serde::Serialize;
use serde_json::Value;

/// One tool invocation inside a reasoning step.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionRecord {
    pub tool: String,
    pub arguments: Value,
}

/// A completed step of the reasoning loop. Steps that decided to answer
/// directly carry a thought only.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReasoningStep {
    pub index: usize,
    pub thought: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
}

impl ReasoningStep {
    pub fn thought_only(index: usize, thought: impl Into<String>) -> Self {
        Self {
            index,
            thought: thought.into(),
            action: None,
            observation: None,
        }
    }
}

/// Flatten steps into the 步骤/思考/行动/观察 block format. Empty input
/// renders to an empty string; callers substitute their own placeholder.
pub fn render(steps: &[ReasoningStep]) -> String {
    let mut blocks = Vec::with_capacity(steps.len());
    for step in steps {
        let mut lines = vec![format!("步骤 {}", step.index), format!("思考: {}", step.thought)];
        if let Some(action) = &step.action {
            lines.push(format!("行动: {}({})", action.tool, action.arguments));
        }
        if let Some(observation) = &step.observation {
            lines.push(format!("观察: {observation}"));
        }
        blocks.push(lines.join("\n"));
    }
    blocks.join("\n\n")
}
