//! OpenAI Chat Completions protocol, in both hosted and self-hosted flavors.
//!
//! The compatible flavor serves Ollama, vLLM, LM Studio and similar servers
//! that reimplement the same wire format: the only differences are that the
//! base URL comes from the model entry and the API key is optional.

use atlas_core::errors::ProviderError;
use atlas_core::messages::ChatMessage;
use atlas_core::model::ModelDescriptor;
use serde_json::json;

use crate::adapter::{require_api_key, ProtocolAdapter, StreamData};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiAdapter {
    /// Self-hosted mode: base URL required on the model, API key optional.
    compatible: bool,
}

impl OpenAiAdapter {
    /// Hosted api.openai.com.
    pub fn standard() -> Self {
        Self { compatible: false }
    }

    /// Any server speaking the same protocol (Ollama, vLLM, LM Studio).
    pub fn compatible() -> Self {
        Self { compatible: true }
    }

    fn base_url(&self, model: &ModelDescriptor) -> Result<String, ProviderError> {
        match (&model.base_url, self.compatible) {
            (Some(base), _) => Ok(base.trim_end_matches('/').to_string()),
            (None, false) => Ok(OPENAI_BASE_URL.to_string()),
            (None, true) => Err(ProviderError::InvalidRequest(format!(
                "openai-compatible model '{}' has no base_url",
                model.id
            ))),
        }
    }
}

impl ProtocolAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        if self.compatible {
            "openai-compatible"
        } else {
            "openai"
        }
    }

    fn endpoint(
        &self,
        model: &ModelDescriptor,
        _streaming: bool,
    ) -> Result<String, ProviderError> {
        Ok(format!("{}/chat/completions", self.base_url(model)?))
    }

    fn headers(
        &self,
        model: &ModelDescriptor,
    ) -> Result<Vec<(&'static str, String)>, ProviderError> {
        if self.compatible {
            // Local servers usually run without auth; send the key only if
            // one is configured.
            match require_api_key(model) {
                Ok(key) => Ok(vec![("authorization", format!("Bearer {key}"))]),
                Err(_) => Ok(Vec::new()),
            }
        } else {
            let key = require_api_key(model)?;
            Ok(vec![("authorization", format!("Bearer {key}"))])
        }
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        model: &ModelDescriptor,
        streaming: bool,
    ) -> Result<serde_json::Value, ProviderError> {
        Ok(json!({
            "model": model.model,
            "messages": messages,
            "temperature": model.temperature,
            "max_tokens": model.max_tokens,
            "stream": streaming,
        }))
    }

    fn parse_response(&self, body: &serde_json::Value) -> Result<String, ProviderError> {
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ProviderError::Translation(
                    "response missing choices[0].message.content".to_string(),
                )
            })
    }

    fn parse_stream_data(&self, data: &str) -> Result<StreamData, ProviderError> {
        if data == "[DONE]" {
            return Ok(StreamData::Done);
        }
        let value: serde_json::Value = serde_json::from_str(data).map_err(|e| {
            ProviderError::Translation(format!("unparseable stream chunk: {e}"))
        })?;
        match value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("delta"))
            .and_then(|d| d.get("content"))
            .and_then(|c| c.as_str())
        {
            Some(text) => Ok(StreamData::Token(text.to_string())),
            // Role preludes, finish_reason markers, usage frames.
            None => Ok(StreamData::Ignore),
        }
    }
}
