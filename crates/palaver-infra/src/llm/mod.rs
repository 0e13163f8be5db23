//! LLM provider implementations.
//!
//! Contains the concrete [`LlmProvider`](palaver_core::llm::provider::LlmProvider)
//! used by Palaver, plus a factory ([`create_provider`]) that builds a client
//! from a configured [`Provider`] and [`build_provider_registry`] which does so
//! for every configured provider at startup.

pub mod openai_compat;

use secrecy::SecretString;

use palaver_core::llm::box_provider::BoxLlmProvider;
use palaver_core::llm::registry::ProviderRegistry;
use palaver_types::llm::LlmError;
use palaver_types::model::{Provider, ProviderKind};

use self::openai_compat::OpenAiCompatibleProvider;

/// Create a [`BoxLlmProvider`] for a configured provider.
///
/// The API key is read from the environment variable named by
/// `api_key_env`. Providers without one (local gateways) get no
/// `Authorization` header.
///
/// # Errors
///
/// Returns [`LlmError::AuthenticationFailed`] if `api_key_env` names a
/// variable that is unset or empty.
pub fn create_provider(provider: &Provider) -> Result<BoxLlmProvider, LlmError> {
    let api_key = match provider.api_key_env.as_deref() {
        Some(var) => {
            let key = std::env::var(var)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or(LlmError::AuthenticationFailed)?;
            Some(SecretString::from(key))
        }
        None => None,
    };

    match provider.kind {
        ProviderKind::OpenAiCompatible => Ok(BoxLlmProvider::new(OpenAiCompatibleProvider::new(
            provider, api_key,
        )?)),
    }
}

/// Build clients for all configured providers.
///
/// Providers that fail to build are logged and left out; the failover
/// selector then treats them as having no live client.
pub fn build_provider_registry(providers: &[Provider]) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        match create_provider(provider) {
            Ok(client) => {
                tracing::debug!(provider = %provider.id, kind = %provider.kind, "Registered LLM provider");
                registry.register(provider.id.clone(), client);
            }
            Err(e) => {
                tracing::warn!(provider = %provider.id, error = %e, "Skipping LLM provider");
            }
        }
    }
    registry
}
