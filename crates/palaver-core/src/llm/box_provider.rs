//! Type-erased provider handle shared by the registry, the assembler and
//! every turn that calls the model.
//!
//! [`LlmProvider`] uses RPITIT, so it cannot be a trait object. Providers are
//! erased through [`LlmProviderDyn`] (boxed futures, blanket-implemented) and
//! held behind an `Arc`, so one client serves summarization and streaming for
//! any number of concurrent turns.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use palaver_types::llm::{CompletionRequest, CompletionResponse, LlmError, ProviderCapabilities};

use super::provider::{LlmProvider, LlmStream};

/// Object-safe mirror of [`LlmProvider`].
pub trait LlmProviderDyn: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> &ProviderCapabilities;

    fn complete_boxed<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<CompletionResponse, LlmError>>;

    fn stream_boxed(&self, request: CompletionRequest) -> LlmStream;
}

impl<T: LlmProvider> LlmProviderDyn for T {
    fn name(&self) -> &str {
        LlmProvider::name(self)
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        LlmProvider::capabilities(self)
    }

    fn complete_boxed<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<CompletionResponse, LlmError>> {
        Box::pin(self.complete(request))
    }

    fn stream_boxed(&self, request: CompletionRequest) -> LlmStream {
        self.stream(request)
    }
}

/// Cheaply cloneable handle to a provider client.
#[derive(Clone)]
pub struct BoxLlmProvider {
    inner: Arc<dyn LlmProviderDyn>,
}

impl fmt::Debug for BoxLlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxLlmProvider")
            .field("name", &self.name())
            .finish()
    }
}

impl BoxLlmProvider {
    pub fn new<T: LlmProvider + 'static>(provider: T) -> Self {
        Self {
            inner: Arc::new(provider),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn capabilities(&self) -> &ProviderCapabilities {
        self.inner.capabilities()
    }

    /// Largest context the provider accepts, used to clamp token budgets.
    pub fn context_window(&self) -> u32 {
        self.capabilities().max_context_tokens
    }

    /// `requested` output tokens, capped at what the provider can produce.
    pub fn output_budget(&self, requested: u32) -> u32 {
        requested.min(self.capabilities().max_output_tokens)
    }

    /// Single-shot completion (used for summaries).
    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        tracing::debug!(provider = %self.name(), model = %request.model, "Completion request");
        self.inner.complete_boxed(request).await
    }

    pub fn stream(&self, request: CompletionRequest) -> LlmStream {
        self.inner.stream_boxed(request)
    }
}
