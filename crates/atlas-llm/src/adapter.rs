//! The protocol adapter seam.
//!
//! Each supported provider protocol implements [`ProtocolAdapter`]; the
//! shared [`crate::client::LlmClient`] drives whichever adapter matches the
//! model's [`Provider`] tag. Adding a provider means adding an adapter — the
//! transport, retry, and streaming layers never change.

use std::sync::Arc;

use atlas_core::errors::ProviderError;
use atlas_core::messages::ChatMessage;
use atlas_core::model::{ModelDescriptor, Provider};

use crate::anthropic::AnthropicAdapter;
use crate::google::GoogleAdapter;
use crate::openai::OpenAiAdapter;

/// What a single SSE `data:` payload contributed to the completion.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamData {
    /// A text fragment to forward downstream.
    Token(String),
    /// The provider's explicit end-of-stream marker.
    Done,
    /// Bookkeeping payloads with no text: pings, role preludes, block
    /// start/stop events. Skipped silently.
    Ignore,
}

/// Protocol-specific behavior for one provider API.
///
/// Implementations must be pure translation: no I/O, no retries, no state.
pub trait ProtocolAdapter: Send + Sync {
    /// Short protocol name used in logs and error context.
    fn name(&self) -> &'static str;

    /// Full request URL for `model`.
    fn endpoint(&self, model: &ModelDescriptor, streaming: bool)
        -> Result<String, ProviderError>;

    /// Protocol headers: auth scheme, version pins. `Content-Type` is set by
    /// the transport.
    fn headers(&self, model: &ModelDescriptor) -> Result<Vec<(&'static str, String)>, ProviderError>;

    /// JSON request body for a chat completion over `messages`.
    fn build_request(
        &self,
        messages: &[ChatMessage],
        model: &ModelDescriptor,
        streaming: bool,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Extract the assistant text from a non-streaming response body.
    fn parse_response(&self, body: &serde_json::Value) -> Result<String, ProviderError>;

    /// Interpret one SSE data payload.
    fn parse_stream_data(&self, data: &str) -> Result<StreamData, ProviderError>;

    /// Map a non-success HTTP response to the shared error taxonomy.
    fn map_error(&self, status: u16, body: &str) -> ProviderError {
        ProviderError::from_status(status, extract_error_message(body))
    }
}

/// Look up the adapter for a provider tag.
///
/// The set is closed: every `Provider` variant has exactly one adapter.
pub fn adapter_for(provider: Provider) -> Arc<dyn ProtocolAdapter> {
    match provider {
        Provider::OpenAi => Arc::new(OpenAiAdapter::standard()),
        Provider::OpenAiCompatible => Arc::new(OpenAiAdapter::compatible()),
        Provider::Anthropic => Arc::new(AnthropicAdapter::new()),
        Provider::Google => Arc::new(GoogleAdapter::new()),
    }
}

/// Pull the human-readable message out of a provider error body.
///
/// All four protocols nest it under `error.message`; fall back to the raw
/// body (truncated) when the shape is unfamiliar.
pub(crate) fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return message.to_string();
        }
        if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.len() > 200 {
        let mut end = 200;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &trimmed[..end])
    } else {
        trimmed.to_string()
    }
}

/// The API key for `model`, or an auth error naming the model.
pub(crate) fn require_api_key(model: &ModelDescriptor) -> Result<String, ProviderError> {
    use secrecy::ExposeSecret;
    model
        .api_key
        .as_ref()
        .map(|k| k.expose_secret().to_string())
        .ok_or_else(|| {
            ProviderError::Auth(format!("no API key configured for model '{}'", model.id))
        })
}
