//! Server-sent-events plumbing shared by every streaming adapter.
//!
//! [`SseStream`] wraps a raw byte stream, reassembles `\n\n`-delimited SSE
//! frames, hands each `data:` payload to the protocol adapter, and yields
//! [`TokenEvent`]s. It also enforces an idle timeout between chunks and
//! synthesizes a final [`TokenEvent::Done`] if the transport closes before
//! the protocol's own end marker arrives (Gemini never sends one).

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use atlas_core::errors::ProviderError;
use atlas_core::stream::TokenEvent;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::time::{Instant, Sleep};

use crate::adapter::{ProtocolAdapter, StreamData};

/// Joined `data:` payload of one SSE frame, or `None` for comment/bookkeeping
/// frames. Multiple data lines concatenate with `\n` per the SSE spec.
fn data_payload(frame: &str) -> Option<String> {
    let mut lines = Vec::new();
    for raw in frame.lines() {
        let line = raw.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("data:") {
            lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // `:` keep-alive comments and `event:`/`id:` lines carry nothing we
        // use; the payloads are self-describing.
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Remove and return the first complete frame from `buffer`, if any.
///
/// Frames are split on the byte pair `\n\n` so a multi-byte character
/// straddling two network chunks is never torn apart.
fn take_frame(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.windows(2).position(|w| w == b"\n\n")?;
    let mut frame: Vec<u8> = buffer.drain(..pos + 2).collect();
    frame.truncate(pos);
    Some(String::from_utf8_lossy(&frame).into_owned())
}

pub struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>,
    adapter: Arc<dyn ProtocolAdapter>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<TokenEvent, ProviderError>>,
    idle_deadline: Pin<Box<Sleep>>,
    idle_duration: Duration,
    /// Transport reached EOF; only queued events remain.
    eof: bool,
    /// `Done` has been yielded; the stream is over.
    finished: bool,
}

impl SseStream {
    pub fn new<S, E>(inner: S, adapter: Arc<dyn ProtocolAdapter>, idle_timeout: Duration) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        let inner = inner.map(|item| item.map_err(|e| e.to_string()));
        Self {
            inner: Box::pin(inner),
            adapter,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            eof: false,
            finished: false,
        }
    }

    fn process_frame(&mut self, frame: &str) {
        let Some(payload) = data_payload(frame) else {
            return;
        };
        if payload.trim().is_empty() {
            return;
        }
        match self.adapter.parse_stream_data(&payload) {
            Ok(StreamData::Token(text)) => self.pending.push_back(Ok(TokenEvent::Delta(text))),
            Ok(StreamData::Done) => self.pending.push_back(Ok(TokenEvent::Done)),
            Ok(StreamData::Ignore) => {}
            Err(e) => self.pending.push_back(Err(e)),
        }
    }
}

impl Stream for SseStream {
    type Item = Result<TokenEvent, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(item) = this.pending.pop_front() {
                if matches!(item, Ok(TokenEvent::Done)) {
                    this.finished = true;
                }
                return Poll::Ready(Some(item));
            }
            if this.finished {
                return Poll::Ready(None);
            }
            if this.eof {
                // Transport closed without an explicit end marker.
                this.finished = true;
                return Poll::Ready(Some(Ok(TokenEvent::Done)));
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.idle_deadline
                        .as_mut()
                        .reset(Instant::now() + this.idle_duration);
                    this.buffer.extend_from_slice(&chunk);
                    while let Some(frame) = take_frame(&mut this.buffer) {
                        this.process_frame(&frame);
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(ProviderError::Network(format!(
                        "stream transport error: {e}"
                    )))));
                }
                Poll::Ready(None) => {
                    this.eof = true;
                    if !this.buffer.is_empty() {
                        let rest = std::mem::take(&mut this.buffer);
                        let rest = String::from_utf8_lossy(&rest).into_owned();
                        this.process_frame(&rest);
                    }
                }
                Poll::Pending => {
                    if this.idle_deadline.as_mut().poll(cx).is_ready() {
                        return Poll::Ready(Some(Err(ProviderError::Timeout(
                            this.idle_duration,
                        ))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
