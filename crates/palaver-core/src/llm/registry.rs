//! Provider registry for runtime provider lookup.

use std::collections::HashMap;

use super::box_provider::BoxLlmProvider;

/// Registry of live LLM provider clients, indexed by provider id.
///
/// The failover selector decides *which* provider a turn calls; this registry
/// hands out the client for that decision.
pub struct ProviderRegistry {
    providers: HashMap<String, BoxLlmProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Register a provider under the given id, replacing any previous one.
    pub fn register(&mut self, id: impl Into<String>, provider: BoxLlmProvider) {
        self.providers.insert(id.into(), provider);
    }

    pub fn get(&self, id: &str) -> Option<&BoxLlmProvider> {
        self.providers.get(id)
    }

    /// All registered provider ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
