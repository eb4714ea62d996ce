//! Prompt assembly for the decision and answer calls.

use atlas_core::tools::ToolDefinition;

const DECISION_TEMPLATE: &str = include_str!("../prompts/decision.txt");
const ANSWER_PREAMBLE: &str = include_str!("../prompts/answer.txt");

/// System prompt for decision steps, with the tool catalog rendered in.
pub fn decision_system(definitions: &[ToolDefinition]) -> String {
    let tools = definitions
        .iter()
        .map(|def| {
            format!(
                "- {}: {}\n  参数: {}",
                def.name, def.description, def.parameters
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    DECISION_TEMPLATE.replace("{tools}", &tools)
}

/// System prompt for the final answer call.
pub fn answer_system() -> &'static str {
    ANSWER_PREAMBLE
}

/// User message for one decision step: the task plus what has happened so far.
pub fn decision_request(user_input: &str, transcript: &str) -> String {
    let transcript = if transcript.is_empty() { "（尚无）" } else { transcript };
    format!(
        "当前任务：{user_input}\n\n已完成的推理步骤：\n{transcript}\n\n请给出下一步决策。"
    )
}

/// User message for the answer call: the task plus the full reasoning trace.
pub fn answer_request(user_input: &str, transcript: &str) -> String {
    let transcript = if transcript.is_empty() { "（尚无）" } else { transcript };
    format!(
        "当前任务：{user_input}\n\n推理过程：\n{transcript}\n\n请基于以上推理过程，给出最终回答。"
    )
}
