//! Models, the providers that serve them, and failover selections.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::llm::ProviderCapabilities;

/// Wire protocol spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(rename = "openai_compatible")]
    OpenAiCompatible,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenAiCompatible => write!(f, "openai_compatible"),
        }
    }
}

/// A configured LLM provider endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: ProviderKind,
    pub base_url: String,
    /// Environment variable holding the API key. Keys never live in config.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub capabilities: ProviderCapabilities,
}

/// A model offered by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub provider_id: String,
    /// Identifier sent to the provider API (e.g. "gpt-4o-mini").
    pub model_name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_kind() -> ProviderKind {
    ProviderKind::OpenAiCompatible
}

fn default_active() -> bool {
    true
}

/// The provider+model pair a turn actually calls after failover selection.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedProvider {
    pub provider: Provider,
    pub model: Model,
    /// True when the pair differs from the model's declared provider.
    pub is_failover: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_defaults() {
        let provider: Provider = serde_json::from_str(
            r#"{"id":"oa","name":"OpenAI","base_url":"https://api.openai.com/v1"}"#,
        )
        .unwrap();
        assert_eq!(provider.kind, ProviderKind::OpenAiCompatible);
        assert!(provider.active);
        assert!(provider.api_key_env.is_none());
    }
}
