//! Config-driven [`AgentCatalog`].
//!
//! `StaticCatalog` indexes the `[[providers]]`, `[[models]]`, `[[agents]]`,
//! `[[agent_versions]]` and `[[users]]` sections of `config.toml` once at
//! startup. Callers without their own `[[users]]` entry get the settings of
//! the entry with id `*`, if there is one.

use std::collections::HashMap;

use uuid::Uuid;

use palaver_core::chat::catalog::AgentCatalog;
use palaver_types::agent::{Agent, AgentVersion};
use palaver_types::config::{CallerSettings, PalaverConfig};
use palaver_types::error::RepositoryError;
use palaver_types::model::{Model, Provider};

/// Caller id whose settings apply to every caller without an entry.
pub const DEFAULT_CALLER: &str = "*";

#[derive(Debug, Default)]
pub struct StaticCatalog {
    agents: HashMap<Uuid, Agent>,
    /// Agent id -> latest published version.
    latest_versions: HashMap<Uuid, AgentVersion>,
    models: HashMap<String, Model>,
    providers: HashMap<String, Provider>,
    callers: HashMap<String, CallerSettings>,
}

impl StaticCatalog {
    pub fn from_config(config: &PalaverConfig) -> Self {
        let mut latest_versions: HashMap<Uuid, AgentVersion> = HashMap::new();
        for version in &config.agent_versions {
            let newer = latest_versions
                .get(&version.agent_id)
                .is_none_or(|current| version.published_at > current.published_at);
            if newer {
                latest_versions.insert(version.agent_id, version.clone());
            }
        }

        let catalog = Self {
            agents: config.agents.iter().map(|a| (a.id, a.clone())).collect(),
            latest_versions,
            models: config.models.iter().map(|m| (m.id.clone(), m.clone())).collect(),
            providers: config
                .providers
                .iter()
                .map(|p| (p.id.clone(), p.clone()))
                .collect(),
            callers: config.users.iter().map(|u| (u.id.clone(), u.clone())).collect(),
        };

        for model in catalog.models.values() {
            if !catalog.providers.contains_key(&model.provider_id) {
                tracing::warn!(model = %model.id, provider = %model.provider_id, "Model references unknown provider");
            }
        }
        tracing::debug!(
            agents = catalog.agents.len(),
            versions = catalog.latest_versions.len(),
            models = catalog.models.len(),
            "Static catalog loaded"
        );
        catalog
    }

    /// All agents, sorted by name.
    pub fn agents(&self) -> Vec<&Agent> {
        let mut agents: Vec<&Agent> = self.agents.values().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    fn caller(&self, caller_id: &str) -> Option<&CallerSettings> {
        self.callers
            .get(caller_id)
            .or_else(|| self.callers.get(DEFAULT_CALLER))
    }
}

impl AgentCatalog for StaticCatalog {
    async fn get_agent(&self, agent_id: &Uuid) -> Result<Option<Agent>, RepositoryError> {
        Ok(self.agents.get(agent_id).cloned())
    }

    async fn latest_version(&self, agent_id: &Uuid) -> Result<Option<AgentVersion>, RepositoryError> {
        Ok(self.latest_versions.get(agent_id).cloned())
    }

    async fn get_model(&self, model_id: &str) -> Result<Option<Model>, RepositoryError> {
        Ok(self.models.get(model_id).cloned())
    }

    async fn get_provider(&self, provider_id: &str) -> Result<Option<Provider>, RepositoryError> {
        Ok(self.providers.get(provider_id).cloned())
    }

    async fn default_model_id(&self, caller_id: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self.caller(caller_id).and_then(|c| c.default_model_id.clone()))
    }

    async fn workspace_model_id(&self, caller_id: &str, agent_id: &Uuid) -> Result<Option<String>, RepositoryError> {
        Ok(self
            .caller(caller_id)
            .and_then(|c| c.workspace_models.get(&agent_id.to_string()).cloned()))
    }

    async fn fallback_chain(&self, caller_id: &str) -> Result<Vec<String>, RepositoryError> {
        Ok(self
            .caller(caller_id)
            .map(|c| c.fallback_chain.clone())
            .unwrap_or_default())
    }
}
