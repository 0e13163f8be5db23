//! Tool surface bound into a turn.
//!
//! A turn sees tools as [`ToolBinding`]s: the spec the model is shown plus an
//! executor. Executors receive the [`TurnContext`] explicitly, so a tool that
//! needs to know which turn invoked it (delegation) never relies on ambient
//! task-local state.
//!
//! Tool execution never fails the turn: executors return text, and any error
//! is rendered into that text for the model to read.

pub mod delegation;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use palaver_types::llm::{ToolCall, ToolSpec};

use crate::chat::turn::TurnContext;

/// Boxed future returned by [`ToolExecutor::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = String> + Send + 'a>>;

/// Something the orchestrator can run when the model requests a tool.
///
/// Object-safe (boxed future) so heterogeneous executors can share one
/// [`ToolSet`].
pub trait ToolExecutor: Send + Sync {
    fn execute<'a>(&'a self, turn: &'a TurnContext, call: &'a ToolCall) -> ToolFuture<'a>;
}

/// A tool spec paired with the executor that serves it.
#[derive(Clone)]
pub struct ToolBinding {
    pub spec: ToolSpec,
    pub executor: Arc<dyn ToolExecutor>,
}

impl std::fmt::Debug for ToolBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBinding")
            .field("spec", &self.spec)
            .field("executor", &"<executor>")
            .finish()
    }
}

/// The tools available to one turn, in resolution order.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    bindings: Vec<ToolBinding>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding. A later binding with the same name is ignored.
    pub fn push(&mut self, binding: ToolBinding) {
        if self.get(&binding.spec.name).is_some() {
            tracing::warn!(tool = %binding.spec.name, "Duplicate tool name, keeping first binding");
            return;
        }
        self.bindings.push(binding);
    }

    pub fn get(&self, name: &str) -> Option<&ToolBinding> {
        self.bindings.iter().find(|b| b.spec.name == name)
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.bindings.iter().map(|b| b.spec.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.bindings.iter().map(|b| b.spec.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Errors resolving a tool server into bindings.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool server: {0}")]
    UnknownServer(String),

    #[error("tool server unavailable: {0}")]
    Unavailable(String),
}

/// Resolves remote tool-server identifiers into live tool bindings.
///
/// Implementations live in palaver-infra (e.g., `HttpToolSource`).
pub trait ToolSource: Send + Sync {
    /// Resolve one tool server for `caller_id`, with the agent's preset
    /// parameters for that server.
    fn resolve(
        &self,
        server_id: &str,
        caller_id: &str,
        preset: Option<&BTreeMap<String, String>>,
    ) -> impl Future<Output = Result<Vec<ToolBinding>, ToolError>> + Send;
}
