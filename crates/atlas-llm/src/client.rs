//! The shared HTTP client behind every provider.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use atlas_core::errors::ProviderError;
use atlas_core::messages::ChatMessage;
use atlas_core::model::ModelDescriptor;
use atlas_core::provider::CompletionClient;
use atlas_core::stream::TokenStream;
use tracing::{debug, instrument, warn};

use crate::adapter::{adapter_for, ProtocolAdapter};
use crate::retry::RetryPolicy;
use crate::sse::SseStream;

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub connect_timeout: Duration,
    /// Whole-request deadline for non-streaming calls. Streaming calls are
    /// bounded per chunk by `idle_timeout` instead.
    pub request_timeout: Duration,
    /// Longest tolerated silence between stream chunks.
    pub idle_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// One client, one connection pool, all providers.
///
/// Model entries select the protocol; the adapter translates, the client
/// transports. Retries cover request establishment only — once a streaming
/// response is open, a mid-stream failure surfaces to the caller rather
/// than replaying tokens the user already saw.
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .expect("failed to build HTTP client");
        Self { http, config }
    }

    async fn send(
        &self,
        adapter: &dyn ProtocolAdapter,
        messages: &[ChatMessage],
        model: &ModelDescriptor,
        streaming: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = adapter.endpoint(model, streaming)?;
        let body = adapter.build_request(messages, model, streaming)?;

        let mut request = self.http.post(&url).json(&body);
        for (name, value) in adapter.headers(model)? {
            request = request.header(name, value);
        }
        if !streaming {
            request = request.timeout(self.config.request_timeout);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.config.request_timeout)
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        let mut error = adapter.map_error(status.as_u16(), &body);
        if let ProviderError::RateLimited { retry_after: slot, .. } = &mut error {
            *slot = retry_after;
        }
        Err(error)
    }

    async fn send_with_retry(
        &self,
        adapter: &dyn ProtocolAdapter,
        messages: &[ChatMessage],
        model: &ModelDescriptor,
        streaming: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let policy: &RetryPolicy = &self.config.retry;
        let mut attempt = 0;
        loop {
            let started = Instant::now();
            match self.send(adapter, messages, model, streaming).await {
                Ok(response) => {
                    debug!(
                        protocol = adapter.name(),
                        attempt = attempt + 1,
                        latency_ms = started.elapsed().as_millis() as u64,
                        "provider request succeeded"
                    );
                    return Ok(response);
                }
                Err(error) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    if error.is_fatal() || attempt + 1 >= policy.max_attempts {
                        warn!(
                            protocol = adapter.name(),
                            attempt = attempt + 1,
                            latency_ms,
                            kind = error.error_kind(),
                            error = %error,
                            "provider request failed"
                        );
                        return Err(error);
                    }
                    let delay = policy.delay_for(attempt, error.suggested_delay());
                    warn!(
                        protocol = adapter.name(),
                        attempt = attempt + 1,
                        latency_ms,
                        delay_ms = delay.as_millis() as u64,
                        kind = error.error_kind(),
                        error = %error,
                        "retrying provider request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for LlmClient {
    fn default() -> Self {
        Self::new(LlmConfig::default())
    }
}

#[async_trait]
impl CompletionClient for LlmClient {
    #[instrument(skip_all, fields(model = %model.id, provider = %model.provider))]
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &ModelDescriptor,
    ) -> Result<String, ProviderError> {
        let adapter = adapter_for(model.provider);
        let response = self
            .send_with_retry(adapter.as_ref(), messages, model, false)
            .await?;
        let body: serde_json::Value = response.json().await.map_err(|e| {
            ProviderError::Network(format!("failed to read response body: {e}"))
        })?;
        adapter.parse_response(&body)
    }

    #[instrument(skip_all, fields(model = %model.id, provider = %model.provider))]
    async fn stream(
        &self,
        messages: &[ChatMessage],
        model: &ModelDescriptor,
    ) -> Result<TokenStream, ProviderError> {
        let adapter = adapter_for(model.provider);
        let response = self
            .send_with_retry(adapter.as_ref(), messages, model, true)
            .await?;
        let stream = SseStream::new(
            response.bytes_stream(),
            adapter,
            self.config.idle_timeout,
        );
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let config = LlmConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn client_builds_with_defaults() {
        let _client = LlmClient::default();
    }
}
