//! ConversationEngine: the entry point for chat turns.
//!
//! Owns the long-lived pieces shared by every turn (provider clients, the
//! failover selector, the stream session registry) and exposes the three
//! delivery surfaces: push-streaming, single-shot, and the delegation
//! variant used by sub-agent tools.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use palaver_types::agent::Agent;
use palaver_types::chat::{Message, Session};
use palaver_types::config::EngineConfig;
use palaver_types::error::RepositoryError;
use palaver_types::event::ChatEventKind;
use palaver_types::llm::ProviderStatusInfo;

use crate::llm::failover::FailoverSelector;
use crate::llm::registry::ProviderRegistry;
use crate::tool::{ToolBinding, ToolSource};
use crate::tool::delegation::DelegationTool;

use super::assembler::{AssemblyError, AssemblyTarget, ContextAssembler, DelegateFactory};
use super::catalog::AgentCatalog;
use super::orchestrator::{TurnOrchestrator, TurnOutcome};
use super::registry::StreamSessionRegistry;
use super::repository::ConversationStore;
use super::transport::{Frame, PushTransport, SingleShotOutcome, SingleShotTransport, Transport};
use super::turn::{ChatReply, ChatRequest, Delivery};

/// Errors surfaced to callers of the engine.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("turn failed: {0}")]
    Turn(String),

    #[error("turn interrupted by a newer stream")]
    Interrupted,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Boxed future of a single-shot reply.
pub type ReplyFuture<'a> = Pin<Box<dyn Future<Output = Result<ChatReply, ChatError>> + Send + 'a>>;

/// Conversation orchestration engine.
///
/// Generic over the store, catalog and tool source so palaver-core never
/// depends on palaver-infra.
pub struct ConversationEngine<S, C, T> {
    store: Arc<S>,
    catalog: Arc<C>,
    tools: Arc<T>,
    providers: ProviderRegistry,
    selector: FailoverSelector,
    registry: StreamSessionRegistry,
    config: EngineConfig,
}

impl<S, C, T> ConversationEngine<S, C, T>
where
    S: ConversationStore + 'static,
    C: AgentCatalog + 'static,
    T: ToolSource + 'static,
{
    pub fn new(
        store: Arc<S>,
        catalog: Arc<C>,
        tools: Arc<T>,
        providers: ProviderRegistry,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            tools,
            providers,
            selector: FailoverSelector::new(),
            registry: StreamSessionRegistry::new(),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn registry(&self) -> &StreamSessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Circuit-breaker state of every provider used so far.
    pub fn provider_status(&self) -> Vec<ProviderStatusInfo> {
        self.selector.status()
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.connection_timeout_ms)
    }

    fn assembler(&self) -> ContextAssembler<'_, S, C, T> {
        ContextAssembler {
            store: &self.store,
            catalog: &self.catalog,
            tools: &self.tools,
            providers: &self.providers,
            selector: &self.selector,
            config: &self.config,
        }
    }

    fn orchestrator(&self) -> TurnOrchestrator<'_, S> {
        TurnOrchestrator {
            store: &self.store,
            providers: &self.providers,
            selector: &self.selector,
            config: &self.config,
        }
    }

    fn delegate_factory(self: &Arc<Self>) -> impl Fn(&Agent) -> ToolBinding + Send + Sync + 'static {
        let engine = Arc::clone(self);
        move |agent: &Agent| DelegationTool::binding(Arc::clone(&engine), agent)
    }

    /// Open a session between `caller_id` and an existing agent.
    pub async fn create_session(&self, agent_id: Uuid, caller_id: &str) -> Result<Session, ChatError> {
        let agent = self
            .catalog
            .get_agent(&agent_id)
            .await?
            .ok_or_else(|| AssemblyError::NotFound(format!("agent {agent_id}")))?;
        if !agent.enabled {
            return Err(AssemblyError::Disabled(format!("agent {agent_id}")).into());
        }

        let session = self.store.create_session(&Session::new(agent_id, caller_id)).await?;
        tracing::info!(session_id = %session.id, agent_id = %agent_id, caller = %caller_id, "Session created");
        Ok(session)
    }

    /// The session's active messages, in prompt order.
    pub async fn active_messages(&self, session_id: &Uuid) -> Result<Vec<Message>, ChatError> {
        if self.store.get_session(session_id).await?.is_none() {
            return Err(AssemblyError::NotFound(format!("session {session_id}")).into());
        }
        let Some(context) = self.store.get_context(session_id).await? else {
            return Ok(Vec::new());
        };
        Ok(self.store.load_by_ids(&context.active_message_ids).await?)
    }

    /// Start a push-streaming turn.
    ///
    /// Resolution errors return before any connection opens. Otherwise the
    /// turn runs on its own task, preempting any live stream on the session,
    /// and the caller reads frames until [`Frame::Complete`].
    pub async fn chat(
        self: &Arc<Self>,
        request: ChatRequest,
        caller_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<Frame>, ChatError> {
        let delegates = self.delegate_factory();
        let turn = self
            .assembler()
            .assemble(
                &request,
                caller_id,
                AssemblyTarget::SessionAgent,
                Delivery::Streaming,
                true,
                Some(&delegates as DelegateFactory<'_>),
            )
            .await?;

        let (connection, frames) = PushTransport.open(self.timeout());
        let state = self.registry.register(turn.session_id, Arc::clone(&connection));

        let engine = Arc::clone(self);
        let span = tracing::info_span!("chat.stream", session_id = %turn.session_id, stream_id = %state.stream_id);
        tokio::spawn(
            async move {
                let outcome = engine
                    .orchestrator()
                    .run(&turn, connection, Some(Arc::clone(&state)))
                    .await;
                engine.registry.release(&turn.session_id, &state);
                tracing::debug!(outcome = ?outcome, "Stream finished");
            }
            .instrument(span),
        );

        Ok(frames)
    }

    /// Run a single-shot turn for the session's agent and wait for its reply.
    pub async fn chat_sync(self: &Arc<Self>, request: ChatRequest, caller_id: &str) -> Result<ChatReply, ChatError> {
        let delegates = self.delegate_factory();
        self.run_single_shot(
            request,
            caller_id,
            AssemblyTarget::SessionAgent,
            true,
            Some(&delegates as DelegateFactory<'_>),
        )
        .await
    }

    /// Run a single-shot turn for an explicit agent in the same session.
    ///
    /// Used by delegation. The target gets no delegation tools of its own, so
    /// sub-agent calls never nest past two levels.
    pub fn chat_sync_with_agent(
        &self,
        request: ChatRequest,
        caller_id: String,
        agent_id: Uuid,
        persist: bool,
    ) -> ReplyFuture<'_> {
        Box::pin(async move {
            self.run_single_shot(request, &caller_id, AssemblyTarget::Delegate(agent_id), persist, None)
                .await
        })
    }

    async fn run_single_shot(
        &self,
        request: ChatRequest,
        caller_id: &str,
        target: AssemblyTarget,
        persist: bool,
        delegates: Option<DelegateFactory<'_>>,
    ) -> Result<ChatReply, ChatError> {
        let turn = self
            .assembler()
            .assemble(&request, caller_id, target, Delivery::SingleShot, persist, delegates)
            .await?;

        let (connection, reply) = SingleShotTransport.open(self.timeout());
        let outcome = self.orchestrator().run(&turn, connection, None).await;
        tracing::debug!(session_id = %turn.session_id, outcome = ?outcome, "Single-shot turn finished");

        match reply.await {
            Ok(SingleShotOutcome::Final(event)) if event.kind == ChatEventKind::EndOfText => Ok(ChatReply {
                session_id: turn.session_id,
                agent_id: turn.agent.id,
                content: event.content,
            }),
            Ok(SingleShotOutcome::Final(event)) => Err(ChatError::Turn(event.content)),
            Ok(SingleShotOutcome::Closed) => Err(ChatError::Interrupted),
            Err(_) => match outcome {
                TurnOutcome::Failed(message) => Err(ChatError::Turn(message)),
                _ => Err(ChatError::Interrupted),
            },
        }
    }

    /// Interrupt the live stream of a session, if any.
    pub fn interrupt(&self, session_id: &Uuid) -> bool {
        self.registry.interrupt_existing(session_id)
    }
}
