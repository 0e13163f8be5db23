//! Multi-agent delegation: a linked agent exposed as a tool.
//!
//! Invoking the tool runs a full single-shot turn for the target agent in the
//! same session, with the sub-turn's own messages kept out of durable
//! history. The parent timeline gets one start marker instead of a generic
//! tool marker, and sub-turn failures come back as tool text.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use palaver_types::agent::Agent;
use palaver_types::chat::{Message, MessageKind, Role};
use palaver_types::event::{ChatEvent, ChatEventKind};
use palaver_types::llm::{ToolCall, ToolSpec};

use crate::chat::catalog::AgentCatalog;
use crate::chat::engine::ConversationEngine;
use crate::chat::repository::ConversationStore;
use crate::chat::turn::{ChatRequest, TurnContext};
use crate::llm::token_budget::estimate_tokens;

use super::{ToolBinding, ToolExecutor, ToolFuture, ToolSource};

/// Result text when the sub-agent answers with nothing.
pub const NO_OUTPUT: &str = "(no output)";

/// Tool that forwards a message to another agent.
pub struct DelegationTool<S, C, T> {
    engine: Arc<ConversationEngine<S, C, T>>,
    agent_id: Uuid,
    agent_name: String,
    tool_name: String,
}

impl<S, C, T> DelegationTool<S, C, T>
where
    S: ConversationStore + 'static,
    C: AgentCatalog + 'static,
    T: ToolSource + 'static,
{
    /// Deterministic tool name for an agent: `call_` plus the lower-cased
    /// name with every non-alphanumeric character replaced by `_`.
    ///
    /// Tool names must stay ASCII for providers, so a name with non-ASCII
    /// characters also gets the last eight hex digits of the agent id.
    pub fn tool_name(agent: &Agent) -> String {
        let name = agent.name.trim();
        let base = if name.is_empty() {
            agent.id.to_string()
        } else {
            name.to_lowercase()
        };
        let slug: String = base
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();

        if base.is_ascii() {
            format!("call_{slug}")
        } else {
            let id = agent.id.simple().to_string();
            format!("call_{slug}_{}", &id[id.len() - 8..])
        }
    }

    /// Build the tool binding offered to the parent agent.
    pub fn binding(engine: Arc<ConversationEngine<S, C, T>>, agent: &Agent) -> ToolBinding {
        let tool_name = Self::tool_name(agent);
        let description = if agent.description.trim().is_empty() {
            format!(
                "Send a message to the {} agent and return its reply.",
                agent.name
            )
        } else {
            agent.description.clone()
        };

        ToolBinding {
            spec: ToolSpec {
                name: tool_name.clone(),
                description,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "message": {
                            "type": "string",
                            "description": "The message to send to the agent."
                        }
                    },
                    "required": ["message"]
                }),
            },
            executor: Arc::new(Self {
                engine,
                agent_id: agent.id,
                agent_name: agent.name.clone(),
                tool_name,
            }),
        }
    }

    async fn delegate(&self, turn: &TurnContext, call: &ToolCall) -> String {
        let Some(message) = call
            .arguments
            .get("message")
            .and_then(|m| m.as_str())
            .filter(|m| !m.trim().is_empty())
        else {
            return "Tool error: missing required string argument 'message'".to_string();
        };

        turn.suppress_tool(&self.tool_name);
        let marker = format!("Sub-agent call: {}", self.agent_name);

        if turn.persist {
            let start = Message::new(turn.session_id, Role::Assistant, marker.clone())
                .with_kind(MessageKind::SubAgentCallStart)
                .with_tokens(estimate_tokens(&marker));
            if let Err(e) = self
                .engine
                .store()
                .save_and_activate(&turn.session_id, std::slice::from_ref(&start))
                .await
            {
                tracing::warn!(session_id = %turn.session_id, error = %e, "Failed to persist sub-agent marker");
            }
        }

        let live = self.engine.registry().get(&turn.session_id);
        if let Some(connection) = &live {
            connection.send(self.event(ChatEventKind::SubAgentCallStarted, marker));
        }

        tracing::info!(
            session_id = %turn.session_id,
            parent_agent_id = %turn.agent.id,
            agent_id = %self.agent_id,
            "Delegating to sub-agent"
        );

        let request = ChatRequest::new(turn.session_id, message);
        let result = self
            .engine
            .chat_sync_with_agent(request, turn.caller_id.clone(), self.agent_id, false)
            .await;

        match result {
            Ok(reply) => {
                if let Some(connection) = &live {
                    connection.send(self.event(
                        ChatEventKind::SubAgentCallComplete,
                        format!("Sub-agent call complete: {}", self.agent_name),
                    ));
                }
                if reply.content.trim().is_empty() {
                    NO_OUTPUT.to_string()
                } else {
                    reply.content
                }
            }
            Err(e) => {
                tracing::warn!(agent_id = %self.agent_id, error = %e, "Sub-agent call failed");
                if let Some(connection) = &live {
                    connection.send(self.event(
                        ChatEventKind::SubAgentCallError,
                        format!("Sub-agent call failed: {}: {e}", self.agent_name),
                    ));
                }
                format!("Tool error: sub-agent '{}' failed: {e}", self.agent_name)
            }
        }
    }

    fn event(&self, kind: ChatEventKind, content: String) -> ChatEvent {
        ChatEvent {
            tool_name: Some(self.tool_name.clone()),
            ..ChatEvent::new(kind, content)
        }
    }
}

impl<S, C, T> ToolExecutor for DelegationTool<S, C, T>
where
    S: ConversationStore + 'static,
    C: AgentCatalog + 'static,
    T: ToolSource + 'static,
{
    fn execute<'a>(&'a self, turn: &'a TurnContext, call: &'a ToolCall) -> ToolFuture<'a> {
        Box::pin(self.delegate(turn, call))
    }
}
