//! LLM provider abstractions for Palaver.
//!
//! - `LlmProvider`: RPITIT trait for concrete provider implementations
//! - `BoxLlmProvider`: object-safe wrapper for dynamic dispatch
//! - `FailoverSelector`: circuit-breaker driven provider selection
//! - `TokenBudgetManager`: context-window policy over persisted history

pub mod box_provider;
pub mod failover;
pub mod health;
pub mod provider;
pub mod registry;
pub mod summarizer;
pub mod token_budget;
