use async_trait::async_trait;

use crate::errors::ProviderError;
use crate::messages::ChatMessage;
use crate::model::ModelDescriptor;
use crate::stream::TokenStream;

/// Uniform request/response contract over heterogeneous model providers.
///
/// Implementations are stateless across calls apart from a shared connection
/// pool, so one client instance is safely shared by every session.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Whole-shot completion: returns the assistant's full reply text.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &ModelDescriptor,
    ) -> Result<String, ProviderError>;

    /// Incremental completion: fragments are yielded as they arrive from the
    /// provider and the stream ends with `TokenEvent::Done`.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        model: &ModelDescriptor,
    ) -> Result<TokenStream, ProviderError>;
}
