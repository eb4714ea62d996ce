//! Scripted [`CompletionClient`] for tests.
//!
//! Responses are consumed in order; the mock also records every request's
//! message list so tests can assert on what context actually went out.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use atlas_core::errors::ProviderError;
use atlas_core::messages::ChatMessage;
use atlas_core::model::ModelDescriptor;
use atlas_core::provider::CompletionClient;
use atlas_core::stream::{TokenEvent, TokenStream};
use futures::{stream, StreamExt};
use parking_lot::Mutex;

pub enum MockResponse {
    /// One complete text. Streamed as a single fragment.
    Text(String),
    /// Streamed as these fragments then `Done`; `complete` sees them joined.
    Stream(Vec<String>),
    /// Like `Stream`, but sleeps before each fragment. Lets tests cancel or
    /// observe mid-stream under `tokio::time::pause`.
    StreamPaced(Vec<String>, Duration),
    /// Fragments followed by a mid-stream failure instead of `Done`.
    StreamThenError(Vec<String>, ProviderError),
    /// Fails at request establishment.
    Error(ProviderError),
}

impl MockResponse {
    /// Chunk `text` into small fragments the way providers emit tokens.
    pub fn streamed(text: &str) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let fragments = chars
            .chunks(4)
            .map(|chunk| chunk.iter().collect::<String>())
            .collect();
        MockResponse::Stream(fragments)
    }
}

#[derive(Default)]
pub struct MockClient {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    calls: AtomicUsize,
}

impl MockClient {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Append another scripted response.
    pub fn push(&self, response: MockResponse) {
        self.responses.lock().push_back(response);
    }

    /// Number of provider calls made so far, streaming or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Message lists of every request, in call order.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().clone()
    }

    fn next_response(&self, messages: &[ChatMessage]) -> MockResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(messages.to_vec());
        self.responses.lock().pop_front().unwrap_or_else(|| {
            MockResponse::Error(ProviderError::Network(
                "mock: no scripted response left".to_string(),
            ))
        })
    }
}

#[async_trait]
impl CompletionClient for MockClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _model: &ModelDescriptor,
    ) -> Result<String, ProviderError> {
        match self.next_response(messages) {
            MockResponse::Text(text) => Ok(text),
            MockResponse::Stream(fragments)
            | MockResponse::StreamPaced(fragments, _)
            | MockResponse::StreamThenError(fragments, _) => Ok(fragments.concat()),
            MockResponse::Error(e) => Err(e),
        }
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        _model: &ModelDescriptor,
    ) -> Result<TokenStream, ProviderError> {
        let events: Vec<Result<TokenEvent, ProviderError>> =
            match self.next_response(messages) {
                MockResponse::Text(text) => {
                    vec![Ok(TokenEvent::Delta(text)), Ok(TokenEvent::Done)]
                }
                MockResponse::Stream(fragments) => fragments
                    .into_iter()
                    .map(|f| Ok(TokenEvent::Delta(f)))
                    .chain(std::iter::once(Ok(TokenEvent::Done)))
                    .collect(),
                MockResponse::StreamPaced(fragments, gap) => {
                    let events = fragments
                        .into_iter()
                        .map(TokenEvent::Delta)
                        .chain(std::iter::once(TokenEvent::Done));
                    let paced = stream::iter(events).then(move |event| async move {
                        tokio::time::sleep(gap).await;
                        Ok::<_, ProviderError>(event)
                    });
                    return Ok(Box::pin(paced));
                }
                MockResponse::StreamThenError(fragments, error) => fragments
                    .into_iter()
                    .map(|f| Ok(TokenEvent::Delta(f)))
                    .chain(std::iter::once(Err(error)))
                    .collect(),
                MockResponse::Error(e) => return Err(e),
            };
        Ok(Box::pin(stream::iter(events)))
    }
}
