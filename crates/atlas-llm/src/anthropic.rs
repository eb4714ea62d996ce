//! Anthropic Messages protocol.
//!
//! Differs from the OpenAI shape in three ways the adapter hides: auth goes
//! in `x-api-key` plus a pinned `anthropic-version`, system prompts travel in
//! a top-level `system` field instead of the message list, and streaming uses
//! typed events (`content_block_delta` … `message_stop`) rather than a
//! uniform delta shape.

use atlas_core::errors::ProviderError;
use atlas_core::messages::{ChatMessage, Role};
use atlas_core::model::ModelDescriptor;
use serde_json::json;

use crate::adapter::{require_api_key, ProtocolAdapter, StreamData};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter;

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Map an in-stream `error` event to the shared taxonomy by its type tag.
fn map_stream_error(error_type: &str, message: String) -> ProviderError {
    match error_type {
        "overloaded_error" => ProviderError::Overloaded(message),
        "rate_limit_error" => ProviderError::RateLimited {
            message,
            retry_after: None,
        },
        "authentication_error" | "permission_error" => ProviderError::Auth(message),
        "invalid_request_error" | "not_found_error" => ProviderError::InvalidRequest(message),
        _ => ProviderError::ServerError {
            status: 500,
            body: message,
        },
    }
}

impl ProtocolAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn endpoint(
        &self,
        model: &ModelDescriptor,
        _streaming: bool,
    ) -> Result<String, ProviderError> {
        let base = model
            .base_url
            .as_deref()
            .unwrap_or(ANTHROPIC_BASE_URL)
            .trim_end_matches('/');
        Ok(format!("{base}/v1/messages"))
    }

    fn headers(
        &self,
        model: &ModelDescriptor,
    ) -> Result<Vec<(&'static str, String)>, ProviderError> {
        let key = require_api_key(model)?;
        Ok(vec![
            ("x-api-key", key),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ])
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        model: &ModelDescriptor,
        streaming: bool,
    ) -> Result<serde_json::Value, ProviderError> {
        let system = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let turns: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();

        let mut body = json!({
            "model": model.model,
            "max_tokens": model.max_tokens,
            "temperature": model.temperature,
            "messages": turns,
            "stream": streaming,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        Ok(body)
    }

    fn parse_response(&self, body: &serde_json::Value) -> Result<String, ProviderError> {
        body.get("content")
            .and_then(|c| c.as_array())
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            })
            .and_then(|b| b.get("text"))
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ProviderError::Translation("response missing content[].text".to_string())
            })
    }

    fn parse_stream_data(&self, data: &str) -> Result<StreamData, ProviderError> {
        let value: serde_json::Value = serde_json::from_str(data).map_err(|e| {
            ProviderError::Translation(format!("unparseable stream event: {e}"))
        })?;
        match value.get("type").and_then(|t| t.as_str()) {
            Some("content_block_delta") => {
                let text = value
                    .get("delta")
                    .filter(|d| d.get("type").and_then(|t| t.as_str()) == Some("text_delta"))
                    .and_then(|d| d.get("text"))
                    .and_then(|t| t.as_str());
                match text {
                    Some(text) => Ok(StreamData::Token(text.to_string())),
                    None => Ok(StreamData::Ignore),
                }
            }
            Some("message_stop") => Ok(StreamData::Done),
            Some("error") => {
                let error_type = value
                    .get("error")
                    .and_then(|e| e.get("type"))
                    .and_then(|t| t.as_str())
                    .unwrap_or("api_error");
                let message = value
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("stream error")
                    .to_string();
                Err(map_stream_error(error_type, message))
            }
            // ping, message_start, message_delta, content_block_start/stop.
            Some(_) => Ok(StreamData::Ignore),
            None => Err(ProviderError::Translation(
                "stream event missing type".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::model::Provider;

    fn model() -> ModelDescriptor {
        ModelDescriptor::new(
            "claude-3-5-sonnet",
            "Claude 3.5 Sonnet",
            Provider::Anthropic,
            "claude-3-5-sonnet-latest",
        )
        .with_api_key("sk-ant-test")
    }

    #[test]
    fn endpoint_and_headers() {
        let adapter = AnthropicAdapter::new();
        assert_eq!(
            adapter.endpoint(&model(), true).unwrap(),
            "https://api.anthropic.com/v1/messages"
        );
        let headers = adapter.headers(&model()).unwrap();
        assert_eq!(
            headers,
            vec![
                ("x-api-key", "sk-ant-test".to_string()),
                ("anthropic-version", "2023-06-01".to_string()),
            ]
        );
    }

    #[test]
    fn system_messages_lift_to_top_level() {
        let adapter = AnthropicAdapter::new();
        let messages = vec![
            ChatMessage::system("you are a travel guide"),
            ChatMessage::system("answer in Chinese"),
            ChatMessage::user("推荐一个城市"),
            ChatMessage::assistant("好的"),
        ];
        let body = adapter.build_request(&messages, &model(), false).unwrap();
        assert_eq!(body["system"], "you are a travel guide\n\nanswer in Chinese");
        let turns = body["messages"].as_array().unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0]["role"], "user");
        assert_eq!(turns[1]["role"], "assistant");
        assert_eq!(body["max_tokens"], 2000);
    }

    #[test]
    fn no_system_field_when_absent() {
        let adapter = AnthropicAdapter::new();
        let messages = vec![ChatMessage::user("hi")];
        let body = adapter.build_request(&messages, &model(), true).unwrap();
        assert!(body.get("system").is_none());
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn parses_first_text_block() {
        let adapter = AnthropicAdapter::new();
        let body = serde_json::json!({
            "content": [
                {"type": "text", "text": "杭州值得一去"}
            ]
        });
        assert_eq!(adapter.parse_response(&body).unwrap(), "杭州值得一去");
    }

    #[test]
    fn stream_event_variants() {
        let adapter = AnthropicAdapter::new();

        let delta =
            r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"西湖"}}"#;
        assert_eq!(
            adapter.parse_stream_data(delta).unwrap(),
            StreamData::Token("西湖".to_string())
        );

        let stop = r#"{"type":"message_stop"}"#;
        assert_eq!(adapter.parse_stream_data(stop).unwrap(), StreamData::Done);

        let ping = r#"{"type":"ping"}"#;
        assert_eq!(adapter.parse_stream_data(ping).unwrap(), StreamData::Ignore);

        let start = r#"{"type":"content_block_start","content_block":{"type":"text"}}"#;
        assert_eq!(adapter.parse_stream_data(start).unwrap(), StreamData::Ignore);
    }

    #[test]
    fn stream_error_events_map_to_taxonomy() {
        let adapter = AnthropicAdapter::new();
        let overloaded =
            r#"{"type":"error","error":{"type":"overloaded_error","message":"busy"}}"#;
        assert!(matches!(
            adapter.parse_stream_data(overloaded).unwrap_err(),
            ProviderError::Overloaded(_)
        ));

        let auth =
            r#"{"type":"error","error":{"type":"authentication_error","message":"bad key"}}"#;
        assert!(matches!(
            adapter.parse_stream_data(auth).unwrap_err(),
            ProviderError::Auth(_)
        ));
    }
}
