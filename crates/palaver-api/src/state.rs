//! Application state wiring the engine to its infra implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use palaver_core::chat::engine::ConversationEngine;
use palaver_core::llm::registry::ProviderRegistry;
use palaver_infra::catalog::StaticCatalog;
use palaver_infra::config::load_config;
use palaver_infra::llm::build_provider_registry;
use palaver_infra::store::InMemoryStore;
use palaver_infra::tools::HttpToolSource;
use palaver_types::config::PalaverConfig;

/// The engine pinned to the concrete infra implementations.
pub type ConcreteEngine = ConversationEngine<InMemoryStore, StaticCatalog, HttpToolSource>;

/// Shared application state used by both CLI commands and REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConcreteEngine>,
    pub config: Arc<PalaverConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Load `config.toml` from `data_dir` and build provider clients for it.
    pub async fn init(data_dir: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let config = load_config(data_dir).await;
        let providers = build_provider_registry(&config.providers);
        Ok(Self::with_providers(config, providers, data_dir.to_path_buf()))
    }

    /// Wire state from an already loaded config and provider registry.
    pub fn with_providers(config: PalaverConfig, providers: ProviderRegistry, data_dir: PathBuf) -> Self {
        let engine = ConversationEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(StaticCatalog::from_config(&config)),
            Arc::new(HttpToolSource::new(&config.tool_servers)),
            providers,
            config.engine.clone(),
        );

        tracing::debug!(
            agents = config.agents.len(),
            providers = config.providers.len(),
            tool_servers = config.tool_servers.len(),
            "Application state ready"
        );

        Self {
            engine: Arc::new(engine),
            config: Arc::new(config),
            data_dir,
        }
    }
}
