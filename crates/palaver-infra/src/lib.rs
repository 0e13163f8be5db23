//! Infrastructure layer for Palaver.
//!
//! Implements the ports defined in `palaver-core`: the `config.toml` loader,
//! an in-memory conversation store, a config-driven agent catalog, the HTTP
//! remote tool source, and the OpenAI-compatible streaming LLM provider.

pub mod catalog;
pub mod config;
pub mod llm;
pub mod store;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;
