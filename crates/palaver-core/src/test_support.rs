//! In-memory ports and a scripted provider for engine tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use palaver_types::agent::{Agent, AgentVersion};
use palaver_types::chat::{ConversationContext, Message, Role, Session};
use palaver_types::config::EngineConfig;
use palaver_types::error::RepositoryError;
use palaver_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, ProviderCapabilities, StopReason, StreamEvent,
    ToolCall, ToolSpec, Usage,
};
use palaver_types::model::{Model, Provider, ProviderKind};

use crate::chat::assembler::ContextAssembler;
use crate::chat::catalog::AgentCatalog;
use crate::chat::engine::ConversationEngine;
use crate::chat::orchestrator::TurnOrchestrator;
use crate::chat::repository::ConversationStore;
use crate::chat::transport::Frame;
use crate::chat::turn::TurnContext;
use crate::llm::box_provider::BoxLlmProvider;
use crate::llm::failover::FailoverSelector;
use crate::llm::provider::{LlmProvider, LlmStream};
use crate::llm::registry::ProviderRegistry;
use crate::tool::{ToolBinding, ToolError, ToolExecutor, ToolFuture, ToolSource};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
    messages: Mutex<Vec<Message>>,
    contexts: Mutex<HashMap<Uuid, ConversationContext>>,
}

impl MemoryStore {
    /// Every persisted message of a session, in insertion order.
    pub fn messages(&self, session_id: Uuid) -> Vec<Message> {
        lock(&self.messages)
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect()
    }

    /// The session's active messages, in context order.
    pub fn active_messages(&self, session_id: Uuid) -> Vec<Message> {
        let ids = self.context(session_id).active_message_ids;
        let messages = lock(&self.messages);
        ids.iter()
            .filter_map(|id| messages.iter().find(|m| m.id == *id).cloned())
            .collect()
    }

    pub fn context(&self, session_id: Uuid) -> ConversationContext {
        lock(&self.contexts)
            .get(&session_id)
            .cloned()
            .unwrap_or_else(|| ConversationContext::new(session_id))
    }
}

impl ConversationStore for MemoryStore {
    async fn create_session(&self, session: &Session) -> Result<Session, RepositoryError> {
        lock(&self.sessions).insert(session.id, session.clone());
        Ok(session.clone())
    }

    async fn get_session(&self, session_id: &Uuid) -> Result<Option<Session>, RepositoryError> {
        Ok(lock(&self.sessions).get(session_id).cloned())
    }

    async fn save_and_activate(&self, session_id: &Uuid, messages: &[Message]) -> Result<(), RepositoryError> {
        lock(&self.messages).extend(messages.iter().cloned());
        let mut contexts = lock(&self.contexts);
        let context = contexts
            .entry(*session_id)
            .or_insert_with(|| ConversationContext::new(*session_id));
        context.active_message_ids.extend(messages.iter().map(|m| m.id));
        context.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn update_message(&self, message: &Message) -> Result<(), RepositoryError> {
        let mut messages = lock(&self.messages);
        let stored = messages
            .iter_mut()
            .find(|m| m.id == message.id)
            .ok_or(RepositoryError::NotFound)?;
        *stored = message.clone();
        Ok(())
    }

    async fn load_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Message>, RepositoryError> {
        let messages = lock(&self.messages);
        Ok(ids
            .iter()
            .filter_map(|id| messages.iter().find(|m| m.id == *id).cloned())
            .collect())
    }

    async fn get_context(&self, session_id: &Uuid) -> Result<Option<ConversationContext>, RepositoryError> {
        Ok(lock(&self.contexts).get(session_id).cloned())
    }

    async fn replace_context(&self, context: &ConversationContext) -> Result<(), RepositoryError> {
        lock(&self.contexts).insert(context.session_id, context.clone());
        Ok(())
    }

    async fn list_messages(&self, session_id: &Uuid) -> Result<Vec<Message>, RepositoryError> {
        Ok(self.messages(*session_id))
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Two providers ("primary", "backup"), one model each. Every caller
/// defaults to "primary-model" and falls back to "backup-model".
pub struct FixedCatalog {
    agents: Mutex<HashMap<Uuid, Agent>>,
    versions: Mutex<HashMap<Uuid, AgentVersion>>,
    models: Mutex<HashMap<String, Model>>,
    providers: Mutex<HashMap<String, Provider>>,
}

impl FixedCatalog {
    pub fn new() -> Self {
        let providers = ["primary", "backup"]
            .into_iter()
            .map(|id| {
                let provider = Provider {
                    id: id.to_string(),
                    name: id.to_string(),
                    kind: ProviderKind::OpenAiCompatible,
                    base_url: format!("http://{id}.test/v1"),
                    api_key_env: None,
                    active: true,
                    capabilities: ProviderCapabilities::default(),
                };
                (id.to_string(), provider)
            })
            .collect();
        let models = ["primary", "backup"]
            .into_iter()
            .map(|provider_id| {
                let model = Model {
                    id: format!("{provider_id}-model"),
                    provider_id: provider_id.to_string(),
                    model_name: format!("{provider_id}-llm"),
                    active: true,
                };
                (model.id.clone(), model)
            })
            .collect();

        Self {
            agents: Mutex::new(HashMap::new()),
            versions: Mutex::new(HashMap::new()),
            models: Mutex::new(models),
            providers: Mutex::new(providers),
        }
    }

    pub fn add_agent(&self, agent: Agent) {
        lock(&self.agents).insert(agent.id, agent);
    }

    pub fn publish(&self, agent: &Agent, snapshot: Agent) {
        let version = AgentVersion {
            agent_id: agent.id,
            version: "1.0.0".to_string(),
            published_at: Utc::now(),
            snapshot,
        };
        lock(&self.versions).insert(agent.id, version);
    }

    pub fn deactivate_model(&self, model_id: &str) {
        if let Some(model) = lock(&self.models).get_mut(model_id) {
            model.active = false;
        }
    }

    pub fn deactivate_provider(&self, provider_id: &str) {
        if let Some(provider) = lock(&self.providers).get_mut(provider_id) {
            provider.active = false;
        }
    }
}

impl AgentCatalog for FixedCatalog {
    async fn get_agent(&self, agent_id: &Uuid) -> Result<Option<Agent>, RepositoryError> {
        Ok(lock(&self.agents).get(agent_id).cloned())
    }

    async fn latest_version(&self, agent_id: &Uuid) -> Result<Option<AgentVersion>, RepositoryError> {
        Ok(lock(&self.versions).get(agent_id).cloned())
    }

    async fn get_model(&self, model_id: &str) -> Result<Option<Model>, RepositoryError> {
        Ok(lock(&self.models).get(model_id).cloned())
    }

    async fn get_provider(&self, provider_id: &str) -> Result<Option<Provider>, RepositoryError> {
        Ok(lock(&self.providers).get(provider_id).cloned())
    }

    async fn default_model_id(&self, _caller_id: &str) -> Result<Option<String>, RepositoryError> {
        Ok(Some("primary-model".to_string()))
    }

    async fn workspace_model_id(&self, _caller_id: &str, _agent_id: &Uuid) -> Result<Option<String>, RepositoryError> {
        Ok(None)
    }

    async fn fallback_chain(&self, _caller_id: &str) -> Result<Vec<String>, RepositoryError> {
        Ok(vec!["backup-model".to_string()])
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// Tool server "calc" exposing "add"; every other server is unknown.
pub struct FakeTools;

struct Add;

impl ToolExecutor for Add {
    fn execute<'a>(&'a self, _turn: &'a TurnContext, call: &'a ToolCall) -> ToolFuture<'a> {
        Box::pin(async move {
            let a = call.arguments.get("a").and_then(|v| v.as_i64()).unwrap_or(0);
            let b = call.arguments.get("b").and_then(|v| v.as_i64()).unwrap_or(0);
            (a + b).to_string()
        })
    }
}

impl ToolSource for FakeTools {
    async fn resolve(
        &self,
        server_id: &str,
        _caller_id: &str,
        _preset: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<ToolBinding>, ToolError> {
        if server_id != "calc" {
            return Err(ToolError::UnknownServer(server_id.to_string()));
        }
        Ok(vec![ToolBinding {
            spec: ToolSpec {
                name: "add".to_string(),
                description: "Add two integers.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                    "required": ["a", "b"]
                }),
            },
            executor: Arc::new(Add),
        }])
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// One scripted step of a model stream.
pub enum Step {
    Event(StreamEvent),
    Fail(LlmError),
    /// Never yields again.
    Hang,
    /// Pause before the next step.
    Sleep(std::time::Duration),
}

impl Step {
    pub fn text(text: &str) -> Self {
        Step::Event(StreamEvent::TextDelta {
            text: text.to_string(),
        })
    }

    pub fn tool(id: &str, name: &str, input: serde_json::Value) -> Self {
        Step::Event(StreamEvent::ToolUseComplete {
            id: id.to_string(),
            name: name.to_string(),
            input,
        })
    }

    pub fn usage(input_tokens: u32, output_tokens: u32) -> Self {
        Step::Event(StreamEvent::Usage(Usage {
            input_tokens,
            output_tokens,
        }))
    }

    pub fn error(error: LlmError) -> Self {
        Step::Fail(error)
    }
}

#[derive(Default)]
struct Script {
    streams: Mutex<VecDeque<Vec<Step>>>,
    completions: Mutex<VecDeque<(String, u32)>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

/// Provider replaying queued streams and completions. Clones share one script.
#[derive(Clone)]
pub struct ScriptedProvider {
    script: Arc<Script>,
    capabilities: ProviderCapabilities,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Script::default()),
            capabilities: ProviderCapabilities::default(),
        }
    }

    /// Queue the steps of the next `stream` call.
    pub fn with_stream(&self, steps: Vec<Step>) -> Self {
        lock(&self.script.streams).push_back(steps);
        self.clone()
    }

    /// Queue the next `complete` response.
    pub fn with_completion(&self, text: &str, output_tokens: u32) -> Self {
        lock(&self.script.completions).push_back((text.to_string(), output_tokens));
        self.clone()
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        Arc::clone(&self.script.requests)
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        lock(&self.script.requests).push(request.clone());
        let (content, output_tokens) = lock(&self.script.completions)
            .pop_front()
            .unwrap_or_else(|| ("summary".to_string(), 8));
        Ok(CompletionResponse {
            id: Uuid::now_v7().to_string(),
            content,
            model: request.model.clone(),
            stop_reason: StopReason::EndTurn,
            usage: Usage {
                input_tokens: 0,
                output_tokens,
            },
        })
    }

    fn stream(&self, request: CompletionRequest) -> LlmStream {
        lock(&self.script.requests).push(request);
        let steps = lock(&self.script.streams)
            .pop_front()
            .unwrap_or_else(|| vec![Step::text("ok")]);

        Box::pin(async_stream::stream! {
            for step in steps {
                match step {
                    Step::Event(event) => yield Ok(event),
                    Step::Fail(error) => {
                        yield Err(error);
                        return;
                    }
                    Step::Hang => futures_util::future::pending::<()>().await,
                    Step::Sleep(duration) => tokio::time::sleep(duration).await,
                }
            }
            yield Ok(StreamEvent::Done);
        })
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub catalog: Arc<FixedCatalog>,
    pub tools: Arc<FakeTools>,
    pub providers: ProviderRegistry,
    pub selector: FailoverSelector,
    pub config: EngineConfig,
    script: ScriptedProvider,
}

impl Fixture {
    pub fn new() -> Self {
        let script = ScriptedProvider::new();
        Self {
            store: Arc::new(MemoryStore::default()),
            catalog: Arc::new(FixedCatalog::new()),
            tools: Arc::new(FakeTools),
            providers: Self::registry(&script),
            selector: FailoverSelector::new(),
            config: EngineConfig::default(),
            script,
        }
    }

    fn registry(script: &ScriptedProvider) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register("primary", BoxLlmProvider::new(script.clone()));
        registry.register("backup", BoxLlmProvider::new(script.clone()));
        registry
    }

    /// The script shared by every provider of this fixture.
    pub fn provider_script(&self) -> &ScriptedProvider {
        &self.script
    }

    pub fn assembler(&self) -> ContextAssembler<'_, MemoryStore, FixedCatalog, FakeTools> {
        ContextAssembler {
            store: &self.store,
            catalog: &self.catalog,
            tools: &self.tools,
            providers: &self.providers,
            selector: &self.selector,
            config: &self.config,
        }
    }

    pub fn orchestrator(&self) -> TurnOrchestrator<'_, MemoryStore> {
        TurnOrchestrator {
            store: &self.store,
            providers: &self.providers,
            selector: &self.selector,
            config: &self.config,
        }
    }

    /// An engine over this fixture's store, catalog and script.
    pub fn engine(&self) -> Arc<ConversationEngine<MemoryStore, FixedCatalog, FakeTools>> {
        Arc::new(ConversationEngine::new(
            Arc::clone(&self.store),
            Arc::clone(&self.catalog),
            Arc::clone(&self.tools),
            Self::registry(&self.script),
            self.config.clone(),
        ))
    }

    pub async fn session_for(&self, agent_id: Uuid, caller_id: &str) -> Uuid {
        self.store
            .create_session(&Session::new(agent_id, caller_id))
            .await
            .unwrap()
            .id
    }

    /// Persist alternating user/assistant messages with the given body token
    /// counts, one millisecond apart.
    pub async fn seed_history(&self, session_id: Uuid, tokens: &[u32]) -> Vec<Message> {
        let start = Utc::now() - ChronoDuration::seconds(60);
        let messages: Vec<Message> = tokens
            .iter()
            .enumerate()
            .map(|(i, &t)| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                let mut message = Message::new(session_id, role, format!("message {i}")).with_tokens(t);
                message.created_at = start + ChronoDuration::milliseconds(i as i64);
                message
            })
            .collect();
        self.store.save_and_activate(&session_id, &messages).await.unwrap();
        messages
    }
}

pub fn owned_agent(owner_id: &str, name: &str) -> Agent {
    Agent {
        id: Uuid::now_v7(),
        owner_id: owner_id.to_string(),
        name: name.to_string(),
        description: String::new(),
        system_prompt: format!("You are {name}."),
        tool_preset_params: BTreeMap::new(),
        tool_ids: Vec::new(),
        linked_agent_ids: Vec::new(),
        model_id: None,
        token_budget: None,
        enabled: true,
    }
}

/// Frames already queued on a receiver.
pub fn frames(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<Frame> {
    let mut out = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        out.push(frame);
    }
    out
}

/// Frames up to and including [`Frame::Complete`], waiting as needed.
pub async fn collect_frames(mut rx: mpsc::UnboundedReceiver<Frame>) -> Vec<Frame> {
    let mut out = Vec::new();
    while let Some(frame) = rx.recv().await {
        let done = frame == Frame::Complete;
        out.push(frame);
        if done {
            break;
        }
    }
    out
}
