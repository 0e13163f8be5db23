//! High-availability provider selection.
//!
//! Given a model's declared provider and the caller's fallback chain, picks
//! the provider+model pair a turn actually calls. Health is tracked per
//! provider id and shared across every turn served by one engine.

use dashmap::DashMap;

use palaver_types::llm::{LlmError, ProviderStatusInfo};
use palaver_types::model::{Model, Provider, SelectedProvider};

use super::health::ProviderHealth;

/// Circuit-breaker driven provider selection.
#[derive(Debug, Default)]
pub struct FailoverSelector {
    health: DashMap<String, ProviderHealth>,
}

impl FailoverSelector {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_available(&self, provider: &Provider) -> bool {
        provider.active
            && self
                .health
                .entry(provider.id.clone())
                .or_insert_with(|| ProviderHealth::new(&provider.id))
                .is_available()
    }

    /// Choose the provider+model pair to call.
    ///
    /// The primary wins whenever it is active and its breaker allows traffic.
    /// Otherwise the fallback chain is walked in order. When nothing is
    /// available the primary is returned anyway and the call surfaces the error.
    pub fn select(
        &self,
        model: &Model,
        primary: &Provider,
        fallbacks: &[(Model, Provider)],
    ) -> SelectedProvider {
        if self.is_available(primary) {
            return SelectedProvider {
                provider: primary.clone(),
                model: model.clone(),
                is_failover: false,
            };
        }

        for (fallback_model, fallback_provider) in fallbacks {
            if !fallback_model.active || fallback_provider.id == primary.id {
                continue;
            }
            if self.is_available(fallback_provider) {
                tracing::info!(
                    from = %primary.id,
                    to = %fallback_provider.id,
                    model = %fallback_model.id,
                    "Failing over to fallback provider"
                );
                return SelectedProvider {
                    provider: fallback_provider.clone(),
                    model: fallback_model.clone(),
                    is_failover: true,
                };
            }
        }

        tracing::warn!(provider = %primary.id, "No available provider in fallback chain");
        SelectedProvider {
            provider: primary.clone(),
            model: model.clone(),
            is_failover: false,
        }
    }

    pub fn record_success(&self, provider_id: &str) {
        self.health
            .entry(provider_id.to_string())
            .or_insert_with(|| ProviderHealth::new(provider_id))
            .record_success();
    }

    pub fn record_failure(&self, provider_id: &str, error: &LlmError) {
        self.health
            .entry(provider_id.to_string())
            .or_insert_with(|| ProviderHealth::new(provider_id))
            .record_failure(error);
    }

    /// Health of every provider seen so far, sorted by id.
    pub fn status(&self) -> Vec<ProviderStatusInfo> {
        let mut status: Vec<ProviderStatusInfo> = self
            .health
            .iter()
            .map(|entry| entry.value().to_status_info())
            .collect();
        status.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_types::llm::ProviderCapabilities;
    use palaver_types::model::ProviderKind;

    fn provider(id: &str) -> Provider {
        Provider {
            id: id.to_string(),
            name: id.to_uppercase(),
            kind: ProviderKind::OpenAiCompatible,
            base_url: format!("https://{id}.example.com/v1"),
            api_key_env: None,
            active: true,
            capabilities: ProviderCapabilities::default(),
        }
    }

    fn model(id: &str, provider_id: &str) -> Model {
        Model {
            id: id.to_string(),
            provider_id: provider_id.to_string(),
            model_name: id.to_string(),
            active: true,
        }
    }

    fn trip(selector: &FailoverSelector, provider_id: &str) {
        for _ in 0..3 {
            selector.record_failure(
                provider_id,
                &LlmError::Overloaded("busy".to_string()),
            );
        }
    }

    #[test]
    fn test_primary_selected_when_healthy() {
        let selector = FailoverSelector::new();
        let fallbacks = vec![(model("b-model", "b"), provider("b"))];
        let selected = selector.select(&model("a-model", "a"), &provider("a"), &fallbacks);
        assert_eq!(selected.provider.id, "a");
        assert!(!selected.is_failover);
    }

    #[test]
    fn test_fails_over_in_chain_order() {
        let selector = FailoverSelector::new();
        trip(&selector, "a");
        let fallbacks = vec![
            (model("b-model", "b"), provider("b")),
            (model("c-model", "c"), provider("c")),
        ];
        let selected = selector.select(&model("a-model", "a"), &provider("a"), &fallbacks);
        assert_eq!(selected.provider.id, "b");
        assert_eq!(selected.model.id, "b-model");
        assert!(selected.is_failover);
    }

    #[test]
    fn test_skips_inactive_fallbacks() {
        let selector = FailoverSelector::new();
        let mut primary = provider("a");
        primary.active = false;
        let mut inactive = provider("b");
        inactive.active = false;
        let fallbacks = vec![
            (model("b-model", "b"), inactive),
            (model("c-model", "c"), provider("c")),
        ];
        let selected = selector.select(&model("a-model", "a"), &primary, &fallbacks);
        assert_eq!(selected.provider.id, "c");
    }

    #[test]
    fn test_returns_primary_when_nothing_available() {
        let selector = FailoverSelector::new();
        trip(&selector, "a");
        trip(&selector, "b");
        let fallbacks = vec![(model("b-model", "b"), provider("b"))];
        let selected = selector.select(&model("a-model", "a"), &provider("a"), &fallbacks);
        assert_eq!(selected.provider.id, "a");
        assert!(!selected.is_failover);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let selector = FailoverSelector::new();
        trip(&selector, "a");
        let fallbacks = vec![
            (model("b-model", "b"), provider("b")),
            (model("c-model", "c"), provider("c")),
        ];
        let first = selector.select(&model("a-model", "a"), &provider("a"), &fallbacks);
        let second = selector.select(&model("a-model", "a"), &provider("a"), &fallbacks);
        assert_eq!(first, second);
    }

    #[test]
    fn test_status_sorted() {
        let selector = FailoverSelector::new();
        selector.record_success("z");
        selector.record_success("a");
        let ids: Vec<String> = selector.status().into_iter().map(|s| s.provider_id).collect();
        assert_eq!(ids, vec!["a".to_string(), "z".to_string()]);
    }
}
