//! Configuration types for Palaver.
//!
//! `PalaverConfig` represents the top-level `config.toml`: engine tuning,
//! server binding, and the static catalog of providers, models, agents,
//! tool servers and per-caller settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentVersion};
use crate::budget::TokenBudgetConfig;
use crate::llm::ToolSpec;
use crate::model::{Model, Provider};

/// Top-level configuration. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PalaverConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub models: Vec<Model>,
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub agent_versions: Vec<AgentVersion>,
    #[serde(default)]
    pub tool_servers: Vec<ToolServerConfig>,
    #[serde(default)]
    pub users: Vec<CallerSettings>,
}

/// Tuning for the conversation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum lifetime of one output connection.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Upper bound on model → tool → model rounds within one turn.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Used for agents that do not carry their own budget.
    #[serde(default)]
    pub token_budget: TokenBudgetConfig,
}

fn default_connection_timeout_ms() -> u64 {
    3_000_000
}

fn default_max_tool_rounds() -> usize {
    16
}

fn default_max_output_tokens() -> u32 {
    4_096
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: default_connection_timeout_ms(),
            max_tool_rounds: default_max_tool_rounds(),
            max_output_tokens: default_max_output_tokens(),
            temperature: None,
            token_budget: TokenBudgetConfig::default(),
        }
    }
}

/// HTTP server binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3700
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// A remote tool server and the tools it exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub id: String,
    pub base_url: String,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

/// Per-caller model preferences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallerSettings {
    pub id: String,
    /// Account-wide default model.
    #[serde(default)]
    pub default_model_id: Option<String>,
    /// Ordered alternate model ids tried when a model's provider is unavailable.
    #[serde(default)]
    pub fallback_chain: Vec<String>,
    /// Workspace-level model per agent id.
    #[serde(default)]
    pub workspace_models: BTreeMap<String, String>,
}
