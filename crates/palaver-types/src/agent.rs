//! Agent definitions and their published snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::budget::TokenBudgetConfig;

/// Preset parameters per tool server: `server id -> (key -> value)`.
pub type ToolPresetParams = BTreeMap<String, BTreeMap<String, String>>;

/// A configurable conversational agent: system prompt, bound tools and model.
///
/// Agents are loaded by the catalog and are immutable for the duration of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    /// Caller id of the account that owns (authored) this agent.
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub tool_preset_params: ToolPresetParams,
    /// Remote tool server identifiers bound to this agent.
    #[serde(default)]
    pub tool_ids: Vec<String>,
    /// Agents this agent may delegate to as tools.
    #[serde(default)]
    pub linked_agent_ids: Vec<Uuid>,
    /// Model bound to the agent, used when the request names none.
    #[serde(default)]
    pub model_id: Option<String>,
    /// Overrides the engine-wide token budget when set.
    #[serde(default)]
    pub token_budget: Option<TokenBudgetConfig>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// An immutable published snapshot of an agent.
///
/// Callers who do not own an agent always converse with its latest
/// published version, never with the live definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentVersion {
    pub agent_id: Uuid,
    pub version: String,
    pub published_at: DateTime<Utc>,
    pub snapshot: Agent,
}
