//! Conversation orchestration engine and port trait definitions for Palaver.
//!
//! This crate defines the "ports" (store, catalog, tool source, LLM provider)
//! that the infrastructure layer implements, and the engine built on them:
//! token budgeting, context assembly, the streaming turn state machine, the
//! stream session registry, and multi-agent delegation. It depends only on
//! `palaver-types` -- never on `palaver-infra` or any IO crate.

pub mod chat;
pub mod llm;
pub mod tool;

#[cfg(test)]
pub(crate) mod test_support;
