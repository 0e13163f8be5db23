//! Per-request turn inputs and the resolved turn context.

use std::collections::BTreeSet;
use std::sync::Mutex;

use palaver_types::agent::Agent;
use palaver_types::chat::Message;
use palaver_types::config::EngineConfig;
use palaver_types::model::{Model, Provider, SelectedProvider};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::ToolSet;

/// A user message addressed to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: Uuid,
    pub message: String,
    #[serde(default)]
    pub file_refs: Vec<String>,
    /// Explicit model override for this turn.
    #[serde(default)]
    pub model_id: Option<String>,
}

impl ChatRequest {
    pub fn new(session_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            session_id,
            message: message.into(),
            file_refs: Vec::new(),
            model_id: None,
        }
    }
}

/// How the turn's output reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Many events pushed to a connection; the caller does not block.
    Streaming,
    /// The caller blocks for exactly one final result.
    SingleShot,
}

/// Handler selection for a turn, resolved once during assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    /// Plain conversation, no tools attached.
    Standard,
    /// The model may call tools (remote or delegated agents).
    ToolAgent,
}

/// Execution parameters derived from a [`TurnKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnProfile {
    pub attach_tools: bool,
    pub max_tool_rounds: usize,
}

impl TurnKind {
    pub fn for_tools(tools: &ToolSet) -> Self {
        if tools.is_empty() {
            TurnKind::Standard
        } else {
            TurnKind::ToolAgent
        }
    }

    pub fn profile(&self, config: &EngineConfig) -> TurnProfile {
        match self {
            TurnKind::Standard => TurnProfile {
                attach_tools: false,
                max_tool_rounds: 0,
            },
            TurnKind::ToolAgent => TurnProfile {
                attach_tools: true,
                max_tool_rounds: config.max_tool_rounds,
            },
        }
    }
}

/// Everything one turn needs, resolved before the model is called.
///
/// Immutable once handed to the orchestrator, except the suppressed-tool set
/// which delegation tools write to while the turn runs.
#[derive(Debug)]
pub struct TurnContext {
    pub session_id: Uuid,
    pub caller_id: String,
    pub message: String,
    pub file_refs: Vec<String>,
    pub agent: Agent,
    /// The model resolved from request, workspace, agent or caller default.
    pub model: Model,
    /// The provider+model pair actually called after failover.
    pub selected: SelectedProvider,
    /// The model's declared provider, kept for telemetry.
    pub original_provider: Provider,
    pub tools: ToolSet,
    /// Budget-filtered history, plus the current turn's file pseudo-message.
    pub history: Vec<Message>,
    pub delivery: Delivery,
    /// When false nothing the turn produces is written to durable history.
    pub persist: bool,
    pub kind: TurnKind,
    suppressed_tools: Mutex<BTreeSet<String>>,
}

impl TurnContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: Uuid,
        caller_id: String,
        message: String,
        file_refs: Vec<String>,
        agent: Agent,
        model: Model,
        selected: SelectedProvider,
        original_provider: Provider,
        tools: ToolSet,
        history: Vec<Message>,
        delivery: Delivery,
        persist: bool,
    ) -> Self {
        let kind = TurnKind::for_tools(&tools);
        Self {
            session_id,
            caller_id,
            message,
            file_refs,
            agent,
            model,
            selected,
            original_provider,
            tools,
            history,
            delivery,
            persist,
            kind,
            suppressed_tools: Mutex::new(BTreeSet::new()),
        }
    }

    /// Hide `tool` from the primary timeline for the rest of this turn.
    pub fn suppress_tool(&self, tool: &str) {
        self.suppressed_tools
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(tool.to_string());
    }

    pub fn is_suppressed(&self, tool: &str) -> bool {
        self.suppressed_tools
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(tool)
    }
}

/// Final result of a single-shot turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub session_id: Uuid,
    pub agent_id: Uuid,
    pub content: String,
}
