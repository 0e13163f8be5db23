//! Conversation orchestration for Palaver.
//!
//! - `ConversationStore` / `AgentCatalog`: ports implemented by palaver-infra
//! - `ContextAssembler`: resolves agent, tools, model, provider and history for a turn
//! - `TurnOrchestrator`: the streaming turn state machine
//! - `StreamSessionRegistry`: at most one live stream per session
//! - `ConversationEngine`: the facade tying them together

pub mod assembler;
pub mod catalog;
pub mod engine;
pub mod orchestrator;
pub mod prompt;
pub mod registry;
pub mod repository;
pub mod transport;
pub mod turn;
