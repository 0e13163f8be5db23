//! Streaming turn execution.
//!
//! One turn runs as an explicit state machine:
//!
//! ```text
//! INIT -> STREAMING -> (TOOL_PAUSE <-> STREAMING)* -> COMPLETE | FAILED
//! ```
//!
//! Model events are consumed in arrival order from a single stream, so every
//! handler sees the same serialized per-turn state. A turn whose stream was
//! superseded stops at its next step and writes nothing further.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use pin_project_lite::pin_project;
use tracing::info_span;

use palaver_types::chat::{Message, MessageKind, Role};
use palaver_types::config::EngineConfig;
use palaver_types::error::RepositoryError;
use palaver_types::event::ChatEvent;
use palaver_types::llm::{ChatEntry, CompletionRequest, LlmError, StreamEvent, ToolCall, Usage};

use crate::llm::box_provider::BoxLlmProvider;
use crate::llm::failover::FailoverSelector;
use crate::llm::registry::ProviderRegistry;
use crate::llm::token_budget::estimate_tokens;

use super::prompt::PromptBuilder;
use super::registry::StreamState;
use super::repository::ConversationStore;
use super::transport::ChatConnection;
use super::turn::{Delivery, TurnContext, TurnProfile};

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed { text: String, usage: Usage },
    Failed(String),
    /// A newer stream took over the session; nothing was sent on this one.
    Superseded,
}

#[derive(Debug)]
enum TurnState {
    Streaming,
    ToolPause(Vec<ToolCall>),
    Complete,
    Failed(String),
    Superseded,
}

/// Mutable per-turn state threaded through the state machine.
struct TurnRun<'t> {
    turn: &'t TurnContext,
    client: &'t BoxLlmProvider,
    profile: TurnProfile,
    connection: Arc<dyn ChatConnection>,
    stream_state: Option<Arc<StreamState>>,
    entries: Vec<ChatEntry>,
    accumulator: String,
    usage: Usage,
    rounds: usize,
    user_message: Message,
}

impl TurnRun<'_> {
    fn is_live(&self) -> bool {
        self.stream_state.as_ref().is_none_or(|s| s.is_active())
    }

    async fn superseded(&self) {
        match &self.stream_state {
            Some(state) => state.superseded().await,
            None => std::future::pending().await,
        }
    }

    fn assistant_message(&self, content: String, kind: MessageKind) -> Message {
        let tokens = estimate_tokens(&content);
        let mut message = Message::new(self.turn.session_id, Role::Assistant, content)
            .with_kind(kind)
            .with_tokens(tokens);
        message.model_id = Some(self.turn.selected.model.id.clone());
        message.provider_id = Some(self.turn.selected.provider.id.clone());
        message
    }
}

/// Drives one turn against the model, tools, store and connection.
pub struct TurnOrchestrator<'a, S> {
    pub store: &'a S,
    pub providers: &'a ProviderRegistry,
    pub selector: &'a FailoverSelector,
    pub config: &'a EngineConfig,
}

impl<S: ConversationStore> TurnOrchestrator<'_, S> {
    /// Run `turn` to completion, emitting events on `connection`.
    ///
    /// `stream_state` is the registry entry for top-level streaming turns;
    /// single-shot and delegated turns run without one.
    #[tracing::instrument(
        name = "chat.turn",
        skip_all,
        fields(session_id = %turn.session_id, agent_id = %turn.agent.id, kind = ?turn.kind, delivery = ?turn.delivery)
    )]
    pub async fn run(
        &self,
        turn: &TurnContext,
        connection: Arc<dyn ChatConnection>,
        stream_state: Option<Arc<StreamState>>,
    ) -> TurnOutcome {
        // INIT
        let Some(client) = self.providers.get(&turn.selected.provider.id) else {
            let message = format!("no client registered for provider {}", turn.selected.provider.id);
            connection.send_final(ChatEvent::error(&message));
            return TurnOutcome::Failed(message);
        };

        let mut entries = PromptBuilder::history_entries(&turn.history);
        entries.push(ChatEntry::user(turn.message.clone()));

        let body_tokens = estimate_tokens(&turn.message);
        let user_message = Message::new(turn.session_id, Role::User, turn.message.clone())
            .with_files(turn.file_refs.clone())
            .with_tokens(body_tokens);

        let mut run = TurnRun {
            turn,
            client,
            profile: turn.kind.profile(self.config),
            connection,
            stream_state,
            entries,
            accumulator: String::new(),
            usage: Usage::default(),
            rounds: 0,
            user_message,
        };

        let mut state = match self.persist(turn, &run.user_message).await {
            Ok(()) => TurnState::Streaming,
            Err(e) => TurnState::Failed(e.to_string()),
        };

        loop {
            state = match state {
                TurnState::Streaming => self.stream_round(&mut run).await,
                TurnState::ToolPause(calls) => self.tool_pause(&mut run, calls).await,
                TurnState::Complete => return self.complete(&mut run).await,
                TurnState::Failed(message) => return self.fail(&mut run, message).await,
                TurnState::Superseded => {
                    tracing::debug!(session_id = %turn.session_id, "Turn superseded");
                    return TurnOutcome::Superseded;
                }
            };
        }
    }

    async fn persist(&self, turn: &TurnContext, message: &Message) -> Result<(), RepositoryError> {
        if !turn.persist {
            return Ok(());
        }
        self.store
            .save_and_activate(&turn.session_id, std::slice::from_ref(message))
            .await
    }

    fn timeout_error(&self) -> LlmError {
        LlmError::Timeout(self.config.connection_timeout_ms)
    }

    /// STREAMING: one model call, forwarding text deltas as they arrive.
    async fn stream_round(&self, run: &mut TurnRun<'_>) -> TurnState {
        if !run.is_live() {
            return TurnState::Superseded;
        }

        let turn = run.turn;
        let provider_id = turn.selected.provider.id.as_str();
        let request = CompletionRequest {
            model: turn.selected.model.model_name.clone(),
            messages: run.entries.clone(),
            system: PromptBuilder::system_prompt(&turn.agent),
            max_tokens: run.client.output_budget(self.config.max_output_tokens),
            temperature: self.config.temperature,
            tools: if run.profile.attach_tools {
                turn.tools.specs()
            } else {
                Vec::new()
            },
            stream: true,
        };

        let span = info_span!(
            "gen_ai.stream",
            gen_ai.system = %provider_id,
            gen_ai.request.model = %request.model,
            gen_ai.request.max_tokens = request.max_tokens,
            gen_ai.request.temperature = ?request.temperature,
            gen_ai.request.tool_count = request.tools.len(),
            gen_ai.usage.input_tokens = tracing::field::Empty,
            gen_ai.usage.output_tokens = tracing::field::Empty,
        );
        let mut stream = StreamInSpan::new(run.client.stream(request), span.clone());
        let mut tool_calls = Vec::new();
        let deadline = run.connection.deadline();

        loop {
            let next = tokio::select! {
                biased;
                _ = run.superseded() => return TurnState::Superseded,
                next = tokio::time::timeout_at(deadline, stream.next()) => next,
            };

            let event = match next {
                Err(_) => {
                    let error = self.timeout_error();
                    self.selector.record_failure(provider_id, &error);
                    return TurnState::Failed(error.to_string());
                }
                Ok(None) => break,
                Ok(Some(Err(error))) => {
                    tracing::warn!(provider = %provider_id, error = %error, "Model call failed");
                    self.selector.record_failure(provider_id, &error);
                    return TurnState::Failed(error.to_string());
                }
                Ok(Some(Ok(event))) => event,
            };

            match event {
                StreamEvent::TextDelta { text } => {
                    if let Some(state) = &run.stream_state {
                        state.append_partial(&text);
                    }
                    run.accumulator.push_str(&text);
                    // Single-shot callers only ever see the final event.
                    if turn.delivery == Delivery::Streaming {
                        run.connection.send(ChatEvent::partial_text(text));
                    }
                }
                StreamEvent::ToolUseComplete { id, name, input } => {
                    tool_calls.push(ToolCall {
                        id,
                        name,
                        arguments: input,
                    });
                }
                StreamEvent::Usage(usage) => {
                    span.record("gen_ai.usage.input_tokens", usage.input_tokens);
                    span.record("gen_ai.usage.output_tokens", usage.output_tokens);
                    // The first round's input is what the user's turn cost.
                    if run.rounds == 0 {
                        run.usage.input_tokens = usage.input_tokens;
                    }
                    run.usage.output_tokens += usage.output_tokens;
                }
                StreamEvent::MessageDelta { .. } => {}
                StreamEvent::Done => break,
            }
        }

        self.selector.record_success(provider_id);

        if tool_calls.is_empty() {
            TurnState::Complete
        } else {
            TurnState::ToolPause(tool_calls)
        }
    }

    /// TOOL_PAUSE: flush text, run each requested tool, feed results back.
    async fn tool_pause(&self, run: &mut TurnRun<'_>, calls: Vec<ToolCall>) -> TurnState {
        run.rounds += 1;
        if run.rounds > run.profile.max_tool_rounds {
            return TurnState::Failed(format!(
                "tool round limit of {} exceeded",
                run.profile.max_tool_rounds
            ));
        }
        if !run.is_live() {
            return TurnState::Superseded;
        }

        let turn = run.turn;
        let flushed = std::mem::take(&mut run.accumulator);
        if let Some(state) = &run.stream_state {
            state.take_partial();
        }
        if !flushed.is_empty() {
            let message = run.assistant_message(flushed.clone(), MessageKind::Text);
            if let Err(e) = self.persist(turn, &message).await {
                return TurnState::Failed(e.to_string());
            }
        }
        run.entries
            .push(ChatEntry::assistant_tool_calls(flushed, calls.clone()));

        let deadline = run.connection.deadline();
        for call in &calls {
            let result = match turn.tools.get(&call.name) {
                Some(binding) => {
                    tracing::debug!(tool = %call.name, call_id = %call.id, "Executing tool");
                    match tokio::time::timeout_at(deadline, binding.executor.execute(turn, call)).await {
                        Ok(result) => result,
                        Err(_) => return TurnState::Failed(self.timeout_error().to_string()),
                    }
                }
                None => {
                    tracing::warn!(tool = %call.name, "Model requested unknown tool");
                    format!("Tool error: unknown tool '{}'", call.name)
                }
            };

            if !run.is_live() {
                return TurnState::Superseded;
            }

            if !turn.is_suppressed(&call.name) {
                let marker = format!("Executing tool: {}", call.name);
                let message = run.assistant_message(marker.clone(), MessageKind::ToolCall);
                if let Err(e) = self.persist(turn, &message).await {
                    return TurnState::Failed(e.to_string());
                }
                run.connection.send(ChatEvent::tool_invoked(&call.name, marker));
            }

            run.entries.push(ChatEntry::tool_result(&call.id, result));
        }

        TurnState::Streaming
    }

    /// COMPLETE: backfill token counts, persist, send the terminal event.
    async fn complete(&self, run: &mut TurnRun<'_>) -> TurnOutcome {
        if !run.is_live() {
            return TurnOutcome::Superseded;
        }
        let turn = run.turn;
        let text = std::mem::take(&mut run.accumulator);

        let mut assistant = run.assistant_message(text.clone(), MessageKind::Text);
        if run.usage.output_tokens > 0 {
            assistant = assistant.with_tokens(run.usage.output_tokens);
        }

        if turn.persist {
            if run.usage.input_tokens > 0 {
                run.user_message.token_count = run.usage.input_tokens;
                if let Err(e) = self.store.update_message(&run.user_message).await {
                    tracing::warn!(error = %e, "Failed to backfill user token count");
                }
            }
            if let Err(e) = self.persist(turn, &assistant).await {
                return self.fail(run, e.to_string()).await;
            }
        }

        if let Some(state) = &run.stream_state {
            state.mark_completed();
        }
        tracing::info!(
            session_id = %turn.session_id,
            input_tokens = run.usage.input_tokens,
            output_tokens = run.usage.output_tokens,
            tool_rounds = run.rounds,
            "Turn complete"
        );
        run.connection.send_final(ChatEvent::end_of_text(text.clone()));
        TurnOutcome::Completed {
            text,
            usage: run.usage,
        }
    }

    /// FAILED: keep the text already produced, send one terminal error.
    async fn fail(&self, run: &mut TurnRun<'_>, message: String) -> TurnOutcome {
        if !run.is_live() {
            return TurnOutcome::Superseded;
        }
        let turn = run.turn;
        let partial = std::mem::take(&mut run.accumulator);
        if !partial.is_empty() {
            let flushed = run.assistant_message(partial, MessageKind::Text);
            if let Err(e) = self.persist(turn, &flushed).await {
                tracing::warn!(error = %e, "Failed to persist partial text");
            }
        }

        if let Some(state) = &run.stream_state {
            state.mark_completed();
        }
        tracing::warn!(session_id = %turn.session_id, error = %message, "Turn failed");
        run.connection.send_final(ChatEvent::error(&message));
        TurnOutcome::Failed(message)
    }
}

pin_project! {
    /// Keeps a span entered whenever the wrapped stream is polled, so work
    /// done inside the provider stream is attributed to the model call.
    pub struct StreamInSpan<St> {
        #[pin]
        inner: St,
        span: tracing::Span,
    }
}

impl<St> StreamInSpan<St> {
    pub fn new(inner: St, span: tracing::Span) -> Self {
        Self { inner, span }
    }
}

impl<St: Stream> Stream for StreamInSpan<St> {
    type Item = St::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let _enter = this.span.enter();
        this.inner.poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::transport::{Frame, PushTransport, Transport};
    use crate::test_support::{Fixture, Step, frames, owned_agent};
    use palaver_types::event::ChatEventKind;
    use palaver_types::llm::MessageRole;
    use serde_json::json;
    use std::time::Duration;

    async fn turn_for(fixture: &Fixture, agent: palaver_types::agent::Agent, message: &str) -> TurnContext {
        turn_with_delivery(fixture, agent, message, Delivery::Streaming).await
    }

    async fn turn_with_delivery(
        fixture: &Fixture,
        agent: palaver_types::agent::Agent,
        message: &str,
        delivery: Delivery,
    ) -> TurnContext {
        fixture.catalog.add_agent(agent.clone());
        let session_id = fixture.session_for(agent.id, "alice").await;
        fixture
            .assembler()
            .assemble(
                &crate::chat::turn::ChatRequest::new(session_id, message),
                "alice",
                crate::chat::assembler::AssemblyTarget::SessionAgent,
                delivery,
                true,
                None,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_streams_text_and_persists_in_order() {
        let fixture = Fixture::new();
        fixture.provider_script().with_stream(vec![
            Step::text("Hello, "),
            Step::text("world"),
            Step::usage(42, 5),
        ]);
        let turn = turn_for(&fixture, owned_agent("alice", "Greeter"), "hi").await;
        let (connection, mut rx) = PushTransport.open(Duration::from_secs(5));

        let outcome = fixture.orchestrator().run(&turn, connection, None).await;
        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                text: "Hello, world".to_string(),
                usage: Usage {
                    input_tokens: 42,
                    output_tokens: 5
                }
            }
        );

        let frames = frames(&mut rx);
        let kinds: Vec<ChatEventKind> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Event(e) => Some(e.kind),
                Frame::Complete => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![ChatEventKind::PartialText, ChatEventKind::PartialText, ChatEventKind::EndOfText]
        );
        assert_eq!(frames.last(), Some(&Frame::Complete));

        let active = fixture.store.active_messages(turn.session_id);
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].role, Role::User);
        assert_eq!(active[0].token_count, 42);
        assert_eq!(active[0].body_token_count, 1);
        assert_eq!(active[1].content, "Hello, world");
        assert_eq!(active[1].body_token_count, 5);
        assert_eq!(active[1].provider_id.as_deref(), Some("primary"));
    }

    #[tokio::test]
    async fn test_single_shot_delivery_sends_only_final_text() {
        let fixture = Fixture::new();
        fixture
            .provider_script()
            .with_stream(vec![Step::text("Hello, "), Step::text("world")]);
        let turn = turn_with_delivery(&fixture, owned_agent("alice", "Greeter"), "hi", Delivery::SingleShot).await;
        let (connection, mut rx) = PushTransport.open(Duration::from_secs(5));

        fixture.orchestrator().run(&turn, connection, None).await;

        let events: Vec<ChatEvent> = frames(&mut rx)
            .into_iter()
            .filter_map(|f| match f {
                Frame::Event(e) => Some(e),
                Frame::Complete => None,
            })
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChatEventKind::EndOfText);
        assert_eq!(events[0].content, "Hello, world");
    }

    #[tokio::test]
    async fn test_error_after_partial_text_keeps_flushed_text() {
        let fixture = Fixture::new();
        fixture.provider_script().with_stream(vec![
            Step::text("Hello, "),
            Step::error(LlmError::Provider {
                message: "connection reset".to_string(),
            }),
        ]);
        let turn = turn_for(&fixture, owned_agent("alice", "Greeter"), "hi").await;
        let (connection, mut rx) = PushTransport.open(Duration::from_secs(5));

        let outcome = fixture.orchestrator().run(&turn, connection, None).await;
        assert!(matches!(outcome, TurnOutcome::Failed(ref m) if m.contains("connection reset")));

        let active = fixture.store.active_messages(turn.session_id);
        assert_eq!(active.last().unwrap().role, Role::Assistant);
        assert_eq!(active.last().unwrap().content, "Hello, ");

        let events: Vec<ChatEvent> = frames(&mut rx)
            .into_iter()
            .filter_map(|f| match f {
                Frame::Event(e) => Some(e),
                Frame::Complete => None,
            })
            .collect();
        assert_eq!(events.last().unwrap().kind, ChatEventKind::Error);
        assert!(!events.iter().any(|e| e.kind == ChatEventKind::EndOfText));
    }

    #[tokio::test]
    async fn test_tool_round_feeds_result_back() {
        let fixture = Fixture::new();
        fixture
            .provider_script()
            .with_stream(vec![
                Step::text("Let me add. "),
                Step::tool("call_1", "add", json!({"a": 2, "b": 3})),
            ])
            .with_stream(vec![Step::text("It is 5.")]);
        let mut agent = owned_agent("alice", "Calculator");
        agent.tool_ids = vec!["calc".to_string()];
        let turn = turn_for(&fixture, agent, "2+3?").await;
        let (connection, mut rx) = PushTransport.open(Duration::from_secs(5));

        let outcome = fixture.orchestrator().run(&turn, connection, None).await;
        assert!(matches!(outcome, TurnOutcome::Completed { ref text, .. } if text == "It is 5."));

        let contents: Vec<(MessageKind, String)> = fixture
            .store
            .active_messages(turn.session_id)
            .into_iter()
            .map(|m| (m.kind, m.content))
            .collect();
        assert_eq!(
            contents,
            vec![
                (MessageKind::Text, "2+3?".to_string()),
                (MessageKind::Text, "Let me add. ".to_string()),
                (MessageKind::ToolCall, "Executing tool: add".to_string()),
                (MessageKind::Text, "It is 5.".to_string()),
            ]
        );

        let requests = fixture.provider_script().requests();
        let requests = requests.lock().unwrap();
        let second = &requests[1];
        let tool_entry = second.messages.last().unwrap();
        assert_eq!(tool_entry.role, MessageRole::Tool);
        assert_eq!(tool_entry.content, "5");
        assert_eq!(requests[0].tools.len(), 1);

        assert!(frames(&mut rx).iter().any(|f| matches!(
            f,
            Frame::Event(e) if e.kind == ChatEventKind::ToolInvoked && e.tool_name.as_deref() == Some("add")
        )));
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_text() {
        let fixture = Fixture::new();
        fixture
            .provider_script()
            .with_stream(vec![Step::tool("call_1", "add", json!({}))])
            .with_stream(vec![Step::text("Sorry.")]);
        // A tool-agent turn whose tool set no longer has "add".
        let mut agent = owned_agent("alice", "Plain");
        agent.tool_ids = vec!["calc".to_string()];
        let mut turn = turn_for(&fixture, agent, "hi").await;
        turn.tools = crate::tool::ToolSet::new();
        let (connection, _rx) = PushTransport.open(Duration::from_secs(5));

        let outcome = fixture.orchestrator().run(&turn, connection, None).await;
        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
        let requests = fixture.provider_script().requests();
        let requests = requests.lock().unwrap();
        assert!(requests[1].messages.last().unwrap().content.starts_with("Tool error: unknown tool"));
    }

    #[tokio::test]
    async fn test_tool_round_limit_fails_turn() {
        let mut fixture = Fixture::new();
        fixture.config.max_tool_rounds = 1;
        fixture
            .provider_script()
            .with_stream(vec![Step::tool("c1", "add", json!({"a": 1, "b": 1}))])
            .with_stream(vec![Step::tool("c2", "add", json!({"a": 1, "b": 1}))]);
        let mut agent = owned_agent("alice", "Loop");
        agent.tool_ids = vec!["calc".to_string()];
        let turn = turn_for(&fixture, agent, "loop").await;
        let (connection, _rx) = PushTransport.open(Duration::from_secs(5));

        let outcome = fixture.orchestrator().run(&turn, connection, None).await;
        assert!(matches!(outcome, TurnOutcome::Failed(ref m) if m.contains("tool round limit")));
    }

    #[tokio::test]
    async fn test_deadline_fails_with_timeout() {
        let mut fixture = Fixture::new();
        fixture.config.connection_timeout_ms = 50;
        fixture.provider_script().with_stream(vec![Step::text("slow"), Step::Hang]);
        let turn = turn_for(&fixture, owned_agent("alice", "Slow"), "hi").await;
        let (connection, mut rx) = PushTransport.open(Duration::from_millis(50));

        let outcome = fixture.orchestrator().run(&turn, connection, None).await;
        assert_eq!(outcome, TurnOutcome::Failed("model call timed out after 50ms".to_string()));
        assert!(frames(&mut rx).iter().any(|f| matches!(
            f,
            Frame::Event(e) if e.kind == ChatEventKind::Error
        )));
    }

    #[tokio::test]
    async fn test_suppressed_persistence_writes_nothing() {
        let fixture = Fixture::new();
        fixture.provider_script().with_stream(vec![Step::text("quiet")]);
        let mut turn = turn_for(&fixture, owned_agent("alice", "Quiet"), "hi").await;
        turn.persist = false;
        let (connection, _rx) = PushTransport.open(Duration::from_secs(5));

        let outcome = fixture.orchestrator().run(&turn, connection, None).await;
        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
        assert!(fixture.store.messages(turn.session_id).is_empty());
    }
}
