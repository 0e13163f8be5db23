//! Shared domain types for Palaver.
//!
//! This crate contains the plain data shared by every layer: agents and their
//! published versions, sessions and messages, the per-session conversation
//! context, models and providers, chat events, LLM request/response shapes,
//! configuration, and the associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod agent;
pub mod budget;
pub mod chat;
pub mod config;
pub mod error;
pub mod event;
pub mod llm;
pub mod model;
