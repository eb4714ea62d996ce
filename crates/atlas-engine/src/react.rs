//! The reasoning loop.
//!
//! Each turn alternates decision calls against the model with tool
//! executions, then streams a final answer grounded in the accumulated
//! observations. Decision output streams to the consumer as reasoning
//! fragments in real time; the answer streams as content fragments. Tool
//! failures of every kind become Observations and the loop continues — only
//! a fatal provider error or cancellation ends the turn early. Store writes
//! happen after the answer has streamed; if they fail they are logged and
//! the turn still completes with `done`.

use std::sync::Arc;

use atlas_core::events::TurnEmitter;
use atlas_core::ids::SessionId;
use atlas_core::messages::{ChatMessage, Role};
use atlas_core::model::ModelDescriptor;
use atlas_core::provider::CompletionClient;
use atlas_core::stream::TokenEvent;
use atlas_core::tools::{ToolContext, ToolError};
use atlas_memory::SessionMemory;
use atlas_store::{Database, MessageRepo, SessionRepo};
use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::EngineError;
use crate::parser::{coerce_arguments, parse_decision, Decision};
use crate::prompts;
use crate::registry::{truncate_observation, ToolRegistry};
use crate::transcript::{self, ActionRecord, ReasoningStep};

/// Emitted when the answer stream produced no text at all, so the event
/// sequence still carries at least one content fragment.
const EMPTY_ANSWER_FALLBACK: &str = "抱歉，这次没有生成有效的回答，请再试一次。";

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Decision steps allowed before the answer is forced.
    pub max_steps: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_steps: 6 }
    }
}

/// Persistence handles for finished turns.
pub struct TurnStore {
    pub messages: MessageRepo,
    pub sessions: SessionRepo,
}

impl TurnStore {
    pub fn new(db: Database) -> Self {
        Self {
            messages: MessageRepo::new(db.clone()),
            sessions: SessionRepo::new(db),
        }
    }
}

/// Everything one turn needs. Memory and the emitter are borrowed for the
/// duration of the turn; the session lock upstream guarantees exclusivity.
pub struct TurnRequest<'a> {
    pub session_id: SessionId,
    pub user_input: String,
    pub model: ModelDescriptor,
    pub memory: &'a mut SessionMemory,
    pub emitter: &'a mut TurnEmitter,
    pub cancel: CancellationToken,
}

/// What a finished turn produced, for callers that want more than events.
#[derive(Clone, Debug)]
pub struct TurnOutcome {
    pub answer: String,
    pub steps: Vec<ReasoningStep>,
    /// Rendered step transcript, as persisted on the assistant message.
    pub transcript: String,
}

enum StreamKind {
    Reasoning,
    Answer,
}

/// Drives complete turns: decision loop, tool calls, streamed answer,
/// memory recording and persistence. One runner serves every session.
pub struct TurnRunner {
    client: Arc<dyn CompletionClient>,
    registry: Arc<ToolRegistry>,
    config: EngineConfig,
    store: Option<TurnStore>,
}

impl TurnRunner {
    pub fn new(client: Arc<dyn CompletionClient>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            client,
            registry,
            config: EngineConfig::default(),
            store: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: TurnStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Run one turn to completion, emitting the event sequence as it goes.
    ///
    /// On failure the terminal `error` event has already been emitted when
    /// this returns; cancellation emits nothing further and discards the
    /// partial turn.
    #[instrument(skip_all, fields(session_id = %request.session_id, model = %request.model.id))]
    pub async fn run(&self, mut request: TurnRequest<'_>) -> Result<TurnOutcome, EngineError> {
        match self.drive(&mut request).await {
            Ok(outcome) => {
                info!(
                    steps = outcome.steps.len(),
                    answer_chars = outcome.answer.chars().count(),
                    "turn finished"
                );
                Ok(outcome)
            }
            Err(EngineError::Aborted) => {
                debug!("turn cancelled");
                Err(EngineError::Aborted)
            }
            Err(err) => {
                error!(error = %err, "turn failed");
                request.emitter.error(err.user_message()).await;
                Err(err)
            }
        }
    }

    async fn drive(&self, request: &mut TurnRequest<'_>) -> Result<TurnOutcome, EngineError> {
        let decision_system = prompts::decision_system(&self.registry.definitions());
        let tool_ctx = ToolContext {
            session_id: request.session_id.clone(),
            abort_signal: request.cancel.clone(),
        };

        request.emitter.reasoning_start().await;

        let mut steps: Vec<ReasoningStep> = Vec::new();
        for index in 1..=self.config.max_steps {
            if request.cancel.is_cancelled() {
                return Err(EngineError::Aborted);
            }

            let mut messages = request.memory.build_context(&decision_system);
            messages.push(ChatMessage::user(prompts::decision_request(
                &request.user_input,
                &transcript::render(&steps),
            )));

            let raw = self
                .stream_to_events(
                    &messages,
                    &request.model,
                    request.emitter,
                    &request.cancel,
                    StreamKind::Reasoning,
                )
                .await?;

            match parse_decision(&raw) {
                Decision::Respond { thought } => {
                    debug!(step = index, "decided to answer");
                    steps.push(ReasoningStep::thought_only(index, thought));
                    break;
                }
                Decision::Act {
                    thought,
                    tool,
                    arguments,
                } => {
                    let arguments = match self.registry.get(&tool) {
                        Some(handler) => coerce_arguments(&handler.parameters_schema(), arguments),
                        None => arguments,
                    };
                    let result = self
                        .registry
                        .execute(&tool, arguments.clone(), &tool_ctx)
                        .await;
                    if matches!(result, Err(ToolError::Cancelled)) {
                        return Err(EngineError::Aborted);
                    }
                    let observation = truncate_observation(&observation_text(result));
                    debug!(step = index, tool = %tool, "tool observed");
                    steps.push(ReasoningStep {
                        index,
                        thought,
                        action: Some(ActionRecord { tool, arguments }),
                        observation: Some(observation),
                    });
                }
                Decision::Unparseable { detail } => {
                    warn!(step = index, detail = %detail, "unparseable decision");
                    steps.push(ReasoningStep {
                        index,
                        thought: raw.trim().to_string(),
                        action: None,
                        observation: Some(
                            json!({"success": false, "error": detail}).to_string(),
                        ),
                    });
                }
            }
        }

        request.emitter.reasoning_end().await;
        if request.cancel.is_cancelled() {
            return Err(EngineError::Aborted);
        }

        let final_transcript = transcript::render(&steps);
        let mut messages = request.memory.build_context(prompts::answer_system());
        messages.push(ChatMessage::user(prompts::answer_request(
            &request.user_input,
            &final_transcript,
        )));

        request.emitter.answer_start().await;
        let mut answer = self
            .stream_to_events(
                &messages,
                &request.model,
                request.emitter,
                &request.cancel,
                StreamKind::Answer,
            )
            .await?;
        if answer.trim().is_empty() {
            warn!("answer stream produced no text");
            answer = EMPTY_ANSWER_FALLBACK.to_string();
            request.emitter.chunk(answer.clone()).await;
        }

        request.memory.record_exchange(&request.user_input, &answer);
        if let Some(store) = &self.store {
            // The answer is already delivered: a failed write is logged,
            // never surfaced as a turn failure.
            let persisted = store
                .messages
                .append(&request.session_id, Role::User, &request.user_input, None)
                .and_then(|_| {
                    store.messages.append(
                        &request.session_id,
                        Role::Assistant,
                        &answer,
                        Some(&final_transcript),
                    )
                })
                .and_then(|_| store.sessions.touch(&request.session_id));
            if let Err(e) = persisted {
                warn!(error = %e, "failed to persist finished exchange");
            }
        }

        request.emitter.done().await;
        Ok(TurnOutcome {
            answer,
            steps,
            transcript: final_transcript,
        })
    }

    /// Stream one completion, forwarding every fragment as an event of the
    /// given kind and returning the accumulated text. Cancellation wins over
    /// a pending fragment.
    async fn stream_to_events(
        &self,
        messages: &[ChatMessage],
        model: &ModelDescriptor,
        emitter: &mut TurnEmitter,
        cancel: &CancellationToken,
        kind: StreamKind,
    ) -> Result<String, EngineError> {
        let mut stream = self.client.stream(messages, model).await?;
        let mut text = String::new();
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Aborted),
                item = stream.next() => item,
            };
            match item {
                Some(Ok(TokenEvent::Delta(fragment))) => {
                    match kind {
                        StreamKind::Reasoning => emitter.reasoning_chunk(fragment.clone()).await,
                        StreamKind::Answer => emitter.chunk(fragment.clone()).await,
                    };
                    text.push_str(&fragment);
                }
                Some(Ok(TokenEvent::Done)) | None => break,
                Some(Err(e)) => return Err(EngineError::Provider(e)),
            }
        }
        Ok(text)
    }
}

/// Fold a tool result into the Observation string. Domain misses arrive as
/// successful calls carrying `success: false` and pass through untouched;
/// infrastructure failures are wrapped into the same shape.
fn observation_text(result: Result<serde_json::Value, ToolError>) -> String {
    match result {
        Ok(value) => value.to_string(),
        Err(err) => {
            let message = match err {
                ToolError::UnknownTool(name) => format!("工具不存在: {name}"),
                ToolError::InvalidArguments(detail) => format!("参数无效: {detail}"),
                ToolError::ExecutionFailed(detail) => format!("工具执行失败: {detail}"),
                ToolError::Timeout(after) => format!("工具执行超时: {}s", after.as_secs()),
                ToolError::Cancelled => "已取消".to_string(),
            };
            json!({"success": false, "error": message}).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::TravelKnowledge;
    use crate::tools::register_travel_tools;
    use atlas_core::errors::ProviderError;
    use atlas_core::events::TurnEvent;
    use atlas_core::model::Provider;
    use atlas_llm::mock::{MockClient, MockResponse};
    use atlas_memory::MemoryConfig;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn model() -> ModelDescriptor {
        ModelDescriptor::new("gpt-4o-mini", "GPT-4o mini", Provider::OpenAi, "gpt-4o-mini")
    }

    fn travel_registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        register_travel_tools(&mut registry, Arc::new(TravelKnowledge::builtin()));
        Arc::new(registry)
    }

    fn memory() -> SessionMemory {
        SessionMemory::new(Arc::new(MemoryConfig::default()))
    }

    async fn drain(rx: &mut mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn event_types(events: &[TurnEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_type()).collect()
    }

    /// Decision → tool call → decision → answer, with fragments flowing
    /// through in order.
    #[tokio::test]
    async fn full_turn_with_tool_call() {
        let client = Arc::new(MockClient::new(vec![
            MockResponse::streamed(
                r#"{"thought": "用户想春季出游，先搜索适合春季的城市", "action": "search_cities", "arguments": {"season": "春季"}}"#,
            ),
            MockResponse::Text(
                r#"{"thought": "信息足够了，杭州春天最合适", "action": "respond"}"#.into(),
            ),
            MockResponse::streamed("春天最推荐杭州：西湖边桃红柳绿，人少景美。建议安排三天。"),
        ]));
        let runner = TurnRunner::new(client.clone(), travel_registry());
        let (mut emitter, mut rx) = TurnEmitter::channel(256);
        let mut memory = memory();

        let outcome = runner
            .run(TurnRequest {
                session_id: SessionId::new(),
                user_input: "推荐一个适合春天旅游的城市".into(),
                model: model(),
                memory: &mut memory,
                emitter: &mut emitter,
                cancel: CancellationToken::new(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.answer, "春天最推荐杭州：西湖边桃红柳绿，人少景美。建议安排三天。");
        assert_eq!(outcome.steps.len(), 2);
        let action = outcome.steps[0].action.as_ref().unwrap();
        assert_eq!(action.tool, "search_cities");
        assert!(outcome.steps[0]
            .observation
            .as_ref()
            .unwrap()
            .contains(r#""count":6"#));
        assert!(outcome.steps[1].action.is_none());

        // Event order: all reasoning before the answer, terminated by done.
        let events = drain(&mut rx).await;
        let types = event_types(&events);
        assert_eq!(types.first(), Some(&"reasoning_start"));
        assert_eq!(types.last(), Some(&"done"));
        let reasoning_end = types.iter().position(|t| *t == "reasoning_end").unwrap();
        let answer_start = types.iter().position(|t| *t == "answer_start").unwrap();
        assert!(reasoning_end < answer_start);
        assert!(types[1..reasoning_end]
            .iter()
            .all(|t| *t == "reasoning_chunk"));
        assert!(types[answer_start + 1..types.len() - 1]
            .iter()
            .all(|t| *t == "chunk"));
        assert!(!types.contains(&"error"));

        // Reasoning fragments reassemble to the raw decisions.
        let reasoning: String = events
            .iter()
            .filter_map(|e| match e {
                TurnEvent::ReasoningChunk { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert!(reasoning.contains("search_cities"));
        assert!(reasoning.contains("respond"));

        // The exchange is in working memory, and the second decision saw the
        // first observation.
        assert_eq!(memory.working().len(), 1);
        assert_eq!(client.calls(), 3);
        let requests = client.requests();
        let second_decision = requests[1].last().unwrap();
        assert!(second_decision.content.contains("步骤 1"));
        assert!(second_decision.content.contains("search_cities"));
        let answer_call = requests[2].last().unwrap();
        assert!(answer_call.content.contains("推理过程"));
    }

    /// Invalid tool arguments become an Observation; the loop recovers and
    /// still answers. No error event.
    #[tokio::test]
    async fn invalid_arguments_fold_into_observation() {
        let client = Arc::new(MockClient::new(vec![
            MockResponse::Text(
                r#"{"thought": "算预算", "action": "calculate_budget", "arguments": {"days": 3}}"#
                    .into(),
            ),
            MockResponse::Text(r#"{"thought": "换个方式直接回答", "action": "respond"}"#.into()),
            MockResponse::Text("抱歉，需要知道具体城市才能算预算。".into()),
        ]));
        let runner = TurnRunner::new(client.clone(), travel_registry());
        let (mut emitter, mut rx) = TurnEmitter::channel(256);
        let mut memory = memory();

        let outcome = runner
            .run(TurnRequest {
                session_id: SessionId::new(),
                user_input: "预算多少".into(),
                model: model(),
                memory: &mut memory,
                emitter: &mut emitter,
                cancel: CancellationToken::new(),
            })
            .await
            .unwrap();

        let observation = outcome.steps[0].observation.as_ref().unwrap();
        assert!(observation.contains("参数无效"));
        assert!(observation.contains("city"));
        assert!(!event_types(&drain(&mut rx).await).contains(&"error"));
        assert_eq!(outcome.answer, "抱歉，需要知道具体城市才能算预算。");
    }

    /// A decision naming a tool that does not exist keeps the loop alive.
    #[tokio::test]
    async fn unknown_tool_keeps_loop_alive() {
        let client = Arc::new(MockClient::new(vec![
            MockResponse::Text(
                r#"{"thought": "订个酒店", "action": "book_hotel", "arguments": {"city": "杭州"}}"#
                    .into(),
            ),
            MockResponse::Text(r#"{"thought": "没有订票工具，直接说明", "action": "respond"}"#.into()),
            MockResponse::Text("我无法订酒店，但可以帮你规划行程。".into()),
        ]));
        let runner = TurnRunner::new(client.clone(), travel_registry());
        let (mut emitter, mut rx) = TurnEmitter::channel(256);
        let mut memory = memory();

        let outcome = runner
            .run(TurnRequest {
                session_id: SessionId::new(),
                user_input: "帮我订杭州的酒店".into(),
                model: model(),
                memory: &mut memory,
                emitter: &mut emitter,
                cancel: CancellationToken::new(),
            })
            .await
            .unwrap();

        assert!(outcome.steps[0]
            .observation
            .as_ref()
            .unwrap()
            .contains("工具不存在: book_hotel"));
        assert!(!event_types(&drain(&mut rx).await).contains(&"error"));
        assert_eq!(client.calls(), 3);
    }

    /// Output that parses to JSON but has no usable action is recorded as an
    /// Observation the model can react to next step.
    #[tokio::test]
    async fn unparseable_decision_becomes_observation() {
        let client = Arc::new(MockClient::new(vec![
            MockResponse::Text(r#"{"thought": "嗯……"}"#.into()),
            MockResponse::Text(r#"{"thought": "重新决策，直接回答", "action": "respond"}"#.into()),
            MockResponse::Text("杭州和成都都值得一去。".into()),
        ]));
        let runner = TurnRunner::new(client.clone(), travel_registry());
        let (mut emitter, _rx) = TurnEmitter::channel(256);
        let mut memory = memory();

        let outcome = runner
            .run(TurnRequest {
                session_id: SessionId::new(),
                user_input: "推荐城市".into(),
                model: model(),
                memory: &mut memory,
                emitter: &mut emitter,
                cancel: CancellationToken::new(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.steps.len(), 2);
        assert!(outcome.steps[0]
            .observation
            .as_ref()
            .unwrap()
            .contains("action"));
        assert_eq!(outcome.answer, "杭州和成都都值得一去。");
    }

    /// Plain prose from the model counts as a decision to answer.
    #[tokio::test]
    async fn prose_decision_goes_straight_to_answer() {
        let client = Arc::new(MockClient::new(vec![
            MockResponse::Text("杭州就很好，春天西湖最美。".into()),
            MockResponse::Text("推荐杭州，春天西湖景色最佳。".into()),
        ]));
        let runner = TurnRunner::new(client.clone(), travel_registry());
        let (mut emitter, _rx) = TurnEmitter::channel(256);
        let mut memory = memory();

        let outcome = runner
            .run(TurnRequest {
                session_id: SessionId::new(),
                user_input: "去哪玩".into(),
                model: model(),
                memory: &mut memory,
                emitter: &mut emitter,
                cancel: CancellationToken::new(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.steps[0].thought, "杭州就很好，春天西湖最美。");
        assert_eq!(client.calls(), 2);
    }

    /// Six tool decisions exhaust the budget; the answer is forced anyway.
    #[tokio::test]
    async fn step_budget_forces_answer() {
        let act = r#"{"thought": "再查一次", "action": "get_city_info", "arguments": {"city": "北京"}}"#;
        let mut responses: Vec<MockResponse> =
            (0..6).map(|_| MockResponse::Text(act.into())).collect();
        responses.push(MockResponse::Text("北京四季皆宜，春秋最佳。".into()));

        let client = Arc::new(MockClient::new(responses));
        let runner = TurnRunner::new(client.clone(), travel_registry());
        let (mut emitter, mut rx) = TurnEmitter::channel(1024);
        let mut memory = memory();

        let outcome = runner
            .run(TurnRequest {
                session_id: SessionId::new(),
                user_input: "北京怎么样".into(),
                model: model(),
                memory: &mut memory,
                emitter: &mut emitter,
                cancel: CancellationToken::new(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.steps.len(), 6);
        assert!(outcome.steps.iter().all(|s| s.action.is_some()));
        assert_eq!(client.calls(), 7);
        assert_eq!(outcome.answer, "北京四季皆宜，春秋最佳。");
        assert_eq!(event_types(&drain(&mut rx).await).last(), Some(&"done"));
    }

    /// A fatal provider failure ends the turn with a single error event;
    /// nothing follows and nothing is recorded.
    #[tokio::test]
    async fn fatal_provider_error_terminates_turn() {
        let client = Arc::new(MockClient::new(vec![MockResponse::Error(
            ProviderError::Auth("invalid api key".into()),
        )]));
        let runner = TurnRunner::new(client, travel_registry());
        let (mut emitter, mut rx) = TurnEmitter::channel(256);
        let mut memory = memory();

        let result = runner
            .run(TurnRequest {
                session_id: SessionId::new(),
                user_input: "你好".into(),
                model: model(),
                memory: &mut memory,
                emitter: &mut emitter,
                cancel: CancellationToken::new(),
            })
            .await;

        assert!(matches!(result, Err(EngineError::Provider(ProviderError::Auth(_)))));
        let types = event_types(&drain(&mut rx).await);
        assert_eq!(types, vec!["reasoning_start", "error"]);
        assert_eq!(memory.working().len(), 0);
    }

    /// A provider failure mid-answer leaves the partial chunks followed only
    /// by the error event, and the exchange is not recorded.
    #[tokio::test]
    async fn mid_answer_failure_emits_error_after_partial_chunks() {
        let client = Arc::new(MockClient::new(vec![
            MockResponse::Text(r#"{"thought": "直接回答", "action": "respond"}"#.into()),
            MockResponse::StreamThenError(
                vec!["春天".into(), "推荐".into()],
                ProviderError::ServerError { status: 500, body: "upstream".into() },
            ),
        ]));
        let runner = TurnRunner::new(client, travel_registry());
        let (mut emitter, mut rx) = TurnEmitter::channel(256);
        let mut memory = memory();

        let result = runner
            .run(TurnRequest {
                session_id: SessionId::new(),
                user_input: "推荐城市".into(),
                model: model(),
                memory: &mut memory,
                emitter: &mut emitter,
                cancel: CancellationToken::new(),
            })
            .await;

        assert!(matches!(result, Err(EngineError::Provider(_))));
        let types = event_types(&drain(&mut rx).await);
        assert_eq!(types.last(), Some(&"error"));
        assert!(!types.contains(&"done"));
        assert_eq!(types.iter().filter(|t| **t == "chunk").count(), 2);
        assert_eq!(memory.working().len(), 0);
    }

    /// Cancellation mid-stream stops the turn silently: Err(Aborted), no
    /// further events, nothing recorded.
    #[tokio::test(start_paused = true)]
    async fn cancellation_discards_partial_turn() {
        let client = Arc::new(MockClient::new(vec![MockResponse::StreamPaced(
            vec![
                r#"{"thought": "慢慢"#.to_string(),
                r#"想", "action": "respond"}"#.to_string(),
            ],
            Duration::from_millis(20),
        )]));
        let runner = TurnRunner::new(client.clone(), travel_registry());
        let (mut emitter, mut rx) = TurnEmitter::channel(256);
        let mut memory = memory();
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();

        let run_fut = runner.run(TurnRequest {
            session_id: SessionId::new(),
            user_input: "推荐城市".into(),
            model: model(),
            memory: &mut memory,
            emitter: &mut emitter,
            cancel,
        });
        let watcher = async {
            while let Some(event) = rx.recv().await {
                if matches!(event, TurnEvent::ReasoningChunk { .. }) {
                    canceller.cancel();
                    break;
                }
            }
        };

        let (result, _) = tokio::join!(run_fut, watcher);
        assert!(matches!(result, Err(EngineError::Aborted)));
        // Nothing emitted after cancellation, not even an error.
        assert!(rx.try_recv().is_err());
        assert_eq!(memory.working().len(), 0);
        assert_eq!(client.calls(), 1);
    }

    /// An answer stream that yields no text still satisfies the event
    /// grammar with a fallback fragment.
    #[tokio::test]
    async fn empty_answer_gets_fallback_chunk() {
        let client = Arc::new(MockClient::new(vec![
            MockResponse::Text(r#"{"thought": "直接答", "action": "respond"}"#.into()),
            MockResponse::Stream(vec![]),
        ]));
        let runner = TurnRunner::new(client, travel_registry());
        let (mut emitter, mut rx) = TurnEmitter::channel(256);
        let mut memory = memory();

        let outcome = runner
            .run(TurnRequest {
                session_id: SessionId::new(),
                user_input: "推荐城市".into(),
                model: model(),
                memory: &mut memory,
                emitter: &mut emitter,
                cancel: CancellationToken::new(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.answer, EMPTY_ANSWER_FALLBACK);
        let events = drain(&mut rx).await;
        let chunks: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, TurnEvent::Chunk { .. }))
            .collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(memory.working().len(), 1);
    }

    /// With a store attached the finished turn lands in the database, and
    /// the persisted history can rebuild an equivalent memory.
    #[tokio::test]
    async fn finished_turn_is_persisted_before_done() {
        let db = Database::in_memory().unwrap();
        let session = SessionRepo::new(db.clone())
            .create("新会话", "gpt-4o-mini")
            .unwrap();
        let client = Arc::new(MockClient::new(vec![
            MockResponse::Text(
                r#"{"thought": "查杭州", "action": "get_city_info", "arguments": {"city": "杭州"}}"#
                    .into(),
            ),
            MockResponse::Text(r#"{"thought": "够了", "action": "respond"}"#.into()),
            MockResponse::Text("杭州位于华东，最佳季节是春秋。".into()),
        ]));
        let runner = TurnRunner::new(client, travel_registry())
            .with_store(TurnStore::new(db.clone()));
        let (mut emitter, mut rx) = TurnEmitter::channel(256);
        let mut memory = memory();

        let outcome = runner
            .run(TurnRequest {
                session_id: session.id.clone(),
                user_input: "介绍一下杭州".into(),
                model: model(),
                memory: &mut memory,
                emitter: &mut emitter,
                cancel: CancellationToken::new(),
            })
            .await
            .unwrap();

        assert_eq!(event_types(&drain(&mut rx).await).last(), Some(&"done"));

        let history = MessageRepo::new(db).for_session(&session.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "介绍一下杭州");
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, outcome.answer);
        assert_eq!(history[1].reasoning.as_deref(), Some(outcome.transcript.as_str()));
        assert!(outcome.transcript.contains("行动: get_city_info"));

        // The persisted rows replay into an equivalent working memory.
        let replayed: Vec<ChatMessage> = history
            .iter()
            .map(|row| ChatMessage { role: row.role, content: row.content.clone() })
            .collect();
        let rebuilt = SessionMemory::rebuild(Arc::new(MemoryConfig::default()), &replayed);
        assert_eq!(rebuilt.working().len(), 1);
    }

    /// A store write that fails after the answer has streamed is logged and
    /// swallowed: the consumer still sees `done` and the exchange stays in
    /// working memory.
    #[tokio::test]
    async fn store_failure_after_answer_is_swallowed() {
        let db = Database::in_memory().unwrap();
        // No session row exists, so the FK on messages.session_id fails.
        let client = Arc::new(MockClient::new(vec![
            MockResponse::Text(r#"{"thought": "直接答", "action": "respond"}"#.into()),
            MockResponse::Text("好的。".into()),
        ]));
        let runner =
            TurnRunner::new(client, travel_registry()).with_store(TurnStore::new(db.clone()));
        let (mut emitter, mut rx) = TurnEmitter::channel(256);
        let mut memory = memory();
        let session_id = SessionId::from_raw("sess_missing");

        let outcome = runner
            .run(TurnRequest {
                session_id: session_id.clone(),
                user_input: "你好".into(),
                model: model(),
                memory: &mut memory,
                emitter: &mut emitter,
                cancel: CancellationToken::new(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.answer, "好的。");
        let types = event_types(&drain(&mut rx).await);
        assert_eq!(types.last(), Some(&"done"));
        assert!(!types.contains(&"error"));
        // The delivered exchange survives in memory even though nothing
        // reached the database.
        assert_eq!(memory.working().len(), 1);
        assert_eq!(MessageRepo::new(db).count(&session_id).unwrap(), 0);
    }
}
