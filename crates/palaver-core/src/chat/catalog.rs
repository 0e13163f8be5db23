//! AgentCatalog trait definition.
//!
//! Read-only lookup of agents, their published versions, models, providers,
//! and per-caller model preferences. Administration of these records happens
//! elsewhere; the engine only reads them.

use palaver_types::agent::{Agent, AgentVersion};
use palaver_types::error::RepositoryError;
use palaver_types::model::{Model, Provider};
use uuid::Uuid;

/// Catalog of agents, models and providers.
///
/// Implementations live in palaver-infra (e.g., `StaticCatalog`).
pub trait AgentCatalog: Send + Sync {
    fn get_agent(
        &self,
        agent_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Agent>, RepositoryError>> + Send;

    /// Most recently published snapshot of an agent, if any.
    fn latest_version(
        &self,
        agent_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<AgentVersion>, RepositoryError>> + Send;

    fn get_model(
        &self,
        model_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Model>, RepositoryError>> + Send;

    fn get_provider(
        &self,
        provider_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Provider>, RepositoryError>> + Send;

    /// The caller's account-wide default model.
    fn default_model_id(
        &self,
        caller_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<String>, RepositoryError>> + Send;

    /// The model the caller's workspace binds to this agent.
    fn workspace_model_id(
        &self,
        caller_id: &str,
        agent_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<String>, RepositoryError>> + Send;

    /// The caller's ordered fallback model ids.
    fn fallback_chain(
        &self,
        caller_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>, RepositoryError>> + Send;
}
