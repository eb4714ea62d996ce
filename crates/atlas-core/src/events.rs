use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::ids::SessionId;

/// Ordered, typed event vocabulary for one reasoning turn.
///
/// Per-turn grammar: `session_id`, `reasoning_start`, `reasoning_chunk`*,
/// `reasoning_end`, `answer_start`, `chunk`+, `done`. An `error` may appear
/// at any point and terminates the sequence — nothing follows it, including
/// `done`. Wire shape is the tagged JSON consumed by the SSE transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnEvent {
    #[serde(rename = "session_id")]
    SessionId { session_id: SessionId },
    #[serde(rename = "reasoning_start")]
    ReasoningStart,
    #[serde(rename = "reasoning_chunk")]
    ReasoningChunk { content: String },
    #[serde(rename = "reasoning_end")]
    ReasoningEnd,
    #[serde(rename = "answer_start")]
    AnswerStart,
    #[serde(rename = "chunk")]
    Chunk { content: String },
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "error")]
    Error { error: String },
}

impl TurnEvent {
    /// Wire name of the event, matching the serde tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionId { .. } => "session_id",
            Self::ReasoningStart => "reasoning_start",
            Self::ReasoningChunk { .. } => "reasoning_chunk",
            Self::ReasoningEnd => "reasoning_end",
            Self::AnswerStart => "answer_start",
            Self::Chunk { .. } => "chunk",
            Self::Done => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// Pushes `TurnEvent`s onto a per-turn channel, imposing the total order at
/// the point of emission.
///
/// Once a terminal event has been emitted every further emit is a silent
/// no-op, so a consumer can never observe anything after `done` or `error`.
/// A dropped receiver is also absorbed: emission reports delivery but never
/// fails the engine.
pub struct TurnEmitter {
    tx: mpsc::Sender<TurnEvent>,
    terminated: bool,
}

impl TurnEmitter {
    pub fn new(tx: mpsc::Sender<TurnEvent>) -> Self {
        Self { tx, terminated: false }
    }

    /// Convenience constructor for a fresh per-turn channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TurnEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// True once `done` or `error` has been emitted.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Emit one event. Returns whether the consumer received it.
    pub async fn emit(&mut self, event: TurnEvent) -> bool {
        if self.terminated {
            return false;
        }
        if event.is_terminal() {
            self.terminated = true;
        }
        self.tx.send(event).await.is_ok()
    }

    pub async fn session_id(&mut self, session_id: SessionId) -> bool {
        self.emit(TurnEvent::SessionId { session_id }).await
    }

    pub async fn reasoning_start(&mut self) -> bool {
        self.emit(TurnEvent::ReasoningStart).await
    }

    pub async fn reasoning_chunk(&mut self, content: impl Into<String>) -> bool {
        self.emit(TurnEvent::ReasoningChunk { content: content.into() }).await
    }

    pub async fn reasoning_end(&mut self) -> bool {
        self.emit(TurnEvent::ReasoningEnd).await
    }

    pub async fn answer_start(&mut self) -> bool {
        self.emit(TurnEvent::AnswerStart).await
    }

    pub async fn chunk(&mut self, content: impl Into<String>) -> bool {
        self.emit(TurnEvent::Chunk { content: content.into() }).await
    }

    pub async fn done(&mut self) -> bool {
        self.emit(TurnEvent::Done).await
    }

    pub async fn error(&mut self, message: impl Into<String>) -> bool {
        self.emit(TurnEvent::Error { error: message.into() }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_wire_shapes() {
        let sid = SessionId::from_raw("sess_123");
        let json = serde_json::to_value(TurnEvent::SessionId { session_id: sid }).unwrap();
        assert_eq!(json["type"], "session_id");
        assert_eq!(json["session_id"], "sess_123");

        let json = serde_json::to_value(TurnEvent::ReasoningChunk { content: "想想".into() }).unwrap();
        assert_eq!(json["type"], "reasoning_chunk");
        assert_eq!(json["content"], "想想");

        let json = serde_json::to_value(TurnEvent::Chunk { content: "答案".into() }).unwrap();
        assert_eq!(json["type"], "chunk");
        assert_eq!(json["content"], "答案");

        let json = serde_json::to_value(TurnEvent::Done).unwrap();
        assert_eq!(json["type"], "done");

        let json = serde_json::to_value(TurnEvent::Error { error: "boom".into() }).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn serde_roundtrip() {
        let events = vec![
            TurnEvent::ReasoningStart,
            TurnEvent::ReasoningChunk { content: "思考中".into() },
            TurnEvent::ReasoningEnd,
            TurnEvent::AnswerStart,
            TurnEvent::Chunk { content: "杭州".into() },
            TurnEvent::Done,
        ];
        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let parsed: TurnEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(event, parsed);
        }
    }

    #[test]
    fn terminal_classification() {
        assert!(TurnEvent::Done.is_terminal());
        assert!(TurnEvent::Error { error: "x".into() }.is_terminal());
        assert!(!TurnEvent::ReasoningStart.is_terminal());
        assert!(!TurnEvent::Chunk { content: "x".into() }.is_terminal());
    }

    #[tokio::test]
    async fn emits_in_order() {
        let (mut emitter, mut rx) = TurnEmitter::channel(16);
        emitter.session_id(SessionId::from_raw("sess_1")).await;
        emitter.reasoning_start().await;
        emitter.reasoning_chunk("a").await;
        emitter.reasoning_end().await;
        emitter.answer_start().await;
        emitter.chunk("b").await;
        emitter.done().await;
        drop(emitter);

        let mut types = Vec::new();
        while let Some(event) = rx.recv().await {
            types.push(event.event_type());
        }
        assert_eq!(
            types,
            vec![
                "session_id",
                "reasoning_start",
                "reasoning_chunk",
                "reasoning_end",
                "answer_start",
                "chunk",
                "done"
            ]
        );
    }

    #[tokio::test]
    async fn nothing_after_done() {
        let (mut emitter, mut rx) = TurnEmitter::channel(16);
        assert!(emitter.done().await);
        assert!(emitter.is_terminated());
        assert!(!emitter.chunk("late").await);
        assert!(!emitter.error("late").await);
        drop(emitter);

        assert_eq!(rx.recv().await, Some(TurnEvent::Done));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn error_terminates_no_done_follows() {
        let (mut emitter, mut rx) = TurnEmitter::channel(16);
        emitter.reasoning_start().await;
        assert!(emitter.error("auth failed").await);
        assert!(!emitter.done().await);
        drop(emitter);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], TurnEvent::Error { error: "auth failed".into() });
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_panic() {
        let (mut emitter, rx) = TurnEmitter::channel(1);
        drop(rx);
        assert!(!emitter.chunk("nobody listening").await);
    }
}
