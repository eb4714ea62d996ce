//! Google Gemini (generativelanguage) protocol.
//!
//! The odd one out: auth rides in a `key` query parameter, the assistant
//! role is called `model`, and the streaming endpoint is a separate method
//! (`:streamGenerateContent?alt=sse`) whose chunks are full response bodies
//! with no explicit end marker — the shared stream layer synthesizes one at
//! EOF.

use atlas_core::errors::ProviderError;
use atlas_core::messages::{ChatMessage, Role};
use atlas_core::model::ModelDescriptor;
use serde_json::json;

use crate::adapter::{require_api_key, ProtocolAdapter, StreamData};

const GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleAdapter;

impl GoogleAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GoogleAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Concatenated text parts of the first candidate, if any.
fn candidate_text(body: &serde_json::Value) -> Option<String> {
    let parts = body
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

impl ProtocolAdapter for GoogleAdapter {
    fn name(&self) -> &'static str {
        "google"
    }

    fn endpoint(&self, model: &ModelDescriptor, streaming: bool) -> Result<String, ProviderError> {
        let key = require_api_key(model)?;
        let base = model
            .base_url
            .as_deref()
            .unwrap_or(GOOGLE_BASE_URL)
            .trim_end_matches('/');
        let method = if streaming {
            "streamGenerateContent?alt=sse&key="
        } else {
            "generateContent?key="
        };
        Ok(format!("{base}/models/{}:{method}{key}", model.model))
    }

    fn headers(
        &self,
        _model: &ModelDescriptor,
    ) -> Result<Vec<(&'static str, String)>, ProviderError> {
        // Auth is carried in the query string.
        Ok(Vec::new())
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        model: &ModelDescriptor,
        _streaming: bool,
    ) -> Result<serde_json::Value, ProviderError> {
        let system = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let contents: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                json!({"role": role, "parts": [{"text": m.content}]})
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": model.temperature,
                "maxOutputTokens": model.max_tokens,
            },
        });
        if !system.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        Ok(body)
    }

    fn parse_response(&self, body: &serde_json::Value) -> Result<String, ProviderError> {
        candidate_text(body).ok_or_else(|| {
            ProviderError::Translation(
                "response missing candidates[0].content.parts[].text".to_string(),
            )
        })
    }

    fn parse_stream_data(&self, data: &str) -> Result<StreamData, ProviderError> {
        let value: serde_json::Value = serde_json::from_str(data).map_err(|e| {
            ProviderError::Translation(format!("unparseable stream chunk: {e}"))
        })?;
        if let Some(text) = candidate_text(&value) {
            return Ok(StreamData::Token(text));
        }
        // A text-less candidate carrying only finishReason closes the
        // stream; safety/prompt feedback frames carry nothing useful.
        let finished = value
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("finishReason"))
            .is_some();
        if finished {
            Ok(StreamData::Done)
        } else {
            Ok(StreamData::Ignore)
        }
    }
}
