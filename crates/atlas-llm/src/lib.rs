//! Provider-agnostic LLM client.
//!
//! One HTTP client ([`client::LlmClient`]) speaks every supported provider
//! protocol through a [`adapter::ProtocolAdapter`], which owns the four
//! protocol-specific concerns: request construction, whole-response parsing,
//! stream-chunk parsing, and error mapping. Everything else — connection
//! pooling, retry with backoff, SSE framing, idle timeouts — is shared.

pub mod adapter;
pub mod anthropic;
pub mod catalog;
pub mod client;
pub mod google;
pub mod mock;
pub mod openai;
pub mod retry;
pub mod sse;

pub use adapter::{adapter_for, ProtocolAdapter, StreamData};
pub use catalog::{ModelCatalog, ModelSummary};
pub use client::{LlmClient, LlmConfig};
pub use mock::{MockClient, MockResponse};
pub use retry::RetryPolicy;
