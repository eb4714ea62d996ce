use std::pin::Pin;

use futures::Stream;

use crate::errors::ProviderError;

/// One item of an incremental completion. The stream always terminates with
/// an explicit `Done` marker (or an error), never by silently ending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenEvent {
    /// A text fragment, delivered as it arrived from the provider.
    Delta(String),
    /// End of the completion.
    Done,
}

/// Incremental delivery contract returned by `CompletionClient::stream`.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<TokenEvent, ProviderError>> + Send>>;
