//! Context assembly: everything a turn needs, resolved up front.
//!
//! Resolution runs before any connection is opened, so a missing or disabled
//! agent, model or provider surfaces as one synchronous [`AssemblyError`].

use palaver_types::agent::Agent;
use palaver_types::chat::{ConversationContext, Message, Role};
use palaver_types::config::EngineConfig;
use palaver_types::error::RepositoryError;
use palaver_types::model::{Model, Provider};
use uuid::Uuid;

use crate::llm::failover::FailoverSelector;
use crate::llm::registry::ProviderRegistry;
use crate::llm::summarizer::ProviderSummarizer;
use crate::llm::token_budget::TokenBudgetManager;
use crate::tool::{ToolBinding, ToolSet, ToolSource};

use super::catalog::AgentCatalog;
use super::repository::ConversationStore;
use super::turn::{ChatRequest, Delivery, TurnContext};

/// Errors resolving a turn context.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("disabled: {0}")]
    Disabled(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Which agent a turn is assembled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyTarget {
    /// The agent bound to the session.
    SessionAgent,
    /// An explicitly named agent in the same session (delegation).
    Delegate(Uuid),
}

/// Builds a delegation tool for an enabled linked agent.
pub type DelegateFactory<'a> = &'a (dyn Fn(&Agent) -> ToolBinding + Send + Sync);

/// Resolves agents, tools, models, providers and history into a [`TurnContext`].
pub struct ContextAssembler<'a, S, C, T> {
    pub store: &'a S,
    pub catalog: &'a C,
    pub tools: &'a T,
    pub providers: &'a ProviderRegistry,
    pub selector: &'a FailoverSelector,
    pub config: &'a EngineConfig,
}

impl<S, C, T> ContextAssembler<'_, S, C, T>
where
    S: ConversationStore,
    C: AgentCatalog,
    T: ToolSource,
{
    /// Assemble a turn context for `request` on behalf of `caller_id`.
    ///
    /// `delegates` builds tools for the agent's linked sub-agents; it is only
    /// consulted for session-agent turns, so delegation stays two levels deep.
    pub async fn assemble(
        &self,
        request: &ChatRequest,
        caller_id: &str,
        target: AssemblyTarget,
        delivery: Delivery,
        persist: bool,
        delegates: Option<DelegateFactory<'_>>,
    ) -> Result<TurnContext, AssemblyError> {
        let session = self
            .store
            .get_session(&request.session_id)
            .await?
            .ok_or_else(|| AssemblyError::NotFound(format!("session {}", request.session_id)))?;

        let agent = match target {
            AssemblyTarget::SessionAgent => self.resolve_agent(&session.agent_id, caller_id).await?,
            AssemblyTarget::Delegate(agent_id) => self.resolve_delegate(&agent_id).await?,
        };

        let mut tools = self.resolve_tools(&agent, caller_id).await;
        if let (AssemblyTarget::SessionAgent, Some(make_tool)) = (target, delegates) {
            self.bind_linked_agents(&agent, make_tool, &mut tools).await;
        }

        let model = self.resolve_model(request, caller_id, &agent).await?;
        let original_provider = self
            .catalog
            .get_provider(&model.provider_id)
            .await?
            .ok_or_else(|| AssemblyError::NotFound(format!("provider {}", model.provider_id)))?;

        let fallbacks = self.resolve_fallbacks(caller_id, &model).await?;
        let selected = self.selector.select(&model, &original_provider, &fallbacks);
        if !selected.provider.active {
            return Err(AssemblyError::Disabled(format!("provider {}", selected.provider.id)));
        }
        let client = self.providers.get(&selected.provider.id).ok_or_else(|| {
            AssemblyError::NotFound(format!("provider client {}", selected.provider.id))
        })?;

        // History
        let context = self
            .store
            .get_context(&session.id)
            .await?
            .unwrap_or_else(|| ConversationContext::new(session.id));
        let messages = self.store.load_by_ids(&context.active_message_ids).await?;

        let budget = agent
            .token_budget
            .clone()
            .unwrap_or_else(|| self.config.token_budget.clone())
            .clamped_to(client.context_window());
        let summarizer = ProviderSummarizer::new(client, &selected.model.model_name);
        let outcome = TokenBudgetManager::apply(messages, &budget, &summarizer).await;

        if persist {
            if let Some(summary) = &outcome.summary {
                self.store.save_and_activate(&session.id, std::slice::from_ref(summary)).await?;
                let mut active_message_ids = vec![summary.id];
                active_message_ids.extend(outcome.retained.iter().map(|m| m.id));
                self.store
                    .replace_context(&ConversationContext {
                        session_id: session.id,
                        active_message_ids,
                        summary: Some(summary.content.clone()),
                        updated_at: Some(chrono::Utc::now()),
                    })
                    .await?;
            }
        }

        let mut history = outcome.into_history();
        if !request.file_refs.is_empty() {
            // Attachments of the current turn reach the model but never the
            // durable history.
            history.push(Message::new(session.id, Role::User, "").with_files(request.file_refs.clone()));
        }

        tracing::info!(
            session_id = %session.id,
            agent_id = %agent.id,
            model = %selected.model.id,
            provider = %selected.provider.id,
            failover = selected.is_failover,
            tools = tools.len(),
            history = history.len(),
            "Turn context assembled"
        );

        Ok(TurnContext::new(
            session.id,
            caller_id.to_string(),
            request.message.clone(),
            request.file_refs.clone(),
            agent,
            model,
            selected,
            original_provider,
            tools,
            history,
            delivery,
            persist,
        ))
    }

    /// The live agent for its owner; the latest published snapshot for anyone else.
    async fn resolve_agent(&self, agent_id: &Uuid, caller_id: &str) -> Result<Agent, AssemblyError> {
        let agent = self
            .catalog
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| AssemblyError::NotFound(format!("agent {agent_id}")))?;

        if !agent.enabled {
            return Err(AssemblyError::Disabled(format!("agent {agent_id}")));
        }
        if agent.owner_id == caller_id {
            return Ok(agent);
        }

        let version = self.catalog.latest_version(agent_id).await?.ok_or_else(|| {
            AssemblyError::NotFound(format!("published version of agent {agent_id}"))
        })?;
        tracing::debug!(agent_id = %agent_id, version = %version.version, "Using installed agent snapshot");

        Ok(Agent {
            id: agent.id,
            enabled: agent.enabled,
            ..version.snapshot
        })
    }

    async fn resolve_delegate(&self, agent_id: &Uuid) -> Result<Agent, AssemblyError> {
        let agent = self
            .catalog
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| AssemblyError::NotFound(format!("agent {agent_id}")))?;
        if !agent.enabled {
            return Err(AssemblyError::Disabled(format!("agent {agent_id}")));
        }
        Ok(agent)
    }

    /// Remote tools for the agent. Unresolvable servers are skipped.
    async fn resolve_tools(&self, agent: &Agent, caller_id: &str) -> ToolSet {
        let mut tools = ToolSet::new();
        for server_id in &agent.tool_ids {
            let preset = agent.tool_preset_params.get(server_id);
            match self.tools.resolve(server_id, caller_id, preset).await {
                Ok(bindings) => bindings.into_iter().for_each(|b| tools.push(b)),
                Err(e) => {
                    tracing::warn!(agent_id = %agent.id, tool_server = %server_id, error = %e, "Skipping tool server");
                }
            }
        }
        tools
    }

    async fn bind_linked_agents(&self, agent: &Agent, make_tool: DelegateFactory<'_>, tools: &mut ToolSet) {
        for linked_id in &agent.linked_agent_ids {
            match self.catalog.get_agent(linked_id).await {
                Ok(Some(linked)) if linked.enabled => tools.push(make_tool(&linked)),
                Ok(_) => {
                    tracing::debug!(agent_id = %agent.id, linked_agent_id = %linked_id, "Linked agent missing or disabled");
                }
                Err(e) => {
                    tracing::warn!(agent_id = %agent.id, linked_agent_id = %linked_id, error = %e, "Failed to load linked agent");
                }
            }
        }
    }

    /// Request model, then workspace model, then agent model, then caller default.
    async fn resolve_model(
        &self,
        request: &ChatRequest,
        caller_id: &str,
        agent: &Agent,
    ) -> Result<Model, AssemblyError> {
        let mut model_id = request.model_id.clone();
        if model_id.is_none() {
            model_id = self.catalog.workspace_model_id(caller_id, &agent.id).await?;
        }
        if model_id.is_none() {
            model_id = agent.model_id.clone();
        }
        if model_id.is_none() {
            model_id = self.catalog.default_model_id(caller_id).await?;
        }
        let model_id = model_id
            .ok_or_else(|| AssemblyError::NotFound(format!("model for agent {}", agent.id)))?;

        let model = self
            .catalog
            .get_model(&model_id)
            .await?
            .ok_or_else(|| AssemblyError::NotFound(format!("model {model_id}")))?;
        if !model.active {
            return Err(AssemblyError::Disabled(format!("model {model_id}")));
        }
        Ok(model)
    }

    /// The caller's fallback chain as (model, provider) pairs. Unknown entries are skipped.
    async fn resolve_fallbacks(
        &self,
        caller_id: &str,
        primary: &Model,
    ) -> Result<Vec<(Model, Provider)>, AssemblyError> {
        let mut fallbacks = Vec::new();
        for model_id in self.catalog.fallback_chain(caller_id).await? {
            if model_id == primary.id {
                continue;
            }
            let Some(model) = self.catalog.get_model(&model_id).await? else {
                tracing::debug!(model = %model_id, "Unknown fallback model");
                continue;
            };
            if let Some(provider) = self.catalog.get_provider(&model.provider_id).await? {
                fallbacks.push((model, provider));
            }
        }
        Ok(fallbacks)
    }
}
