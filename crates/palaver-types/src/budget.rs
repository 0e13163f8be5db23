//! Context-window strategy configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How prior messages are kept within the model's context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStrategy {
    /// Keep the full history.
    None,
    /// Keep the newest messages that fit in `max_tokens`.
    SlidingWindow,
    /// Replace the oldest messages with a synthesized summary.
    Summarize,
}

impl fmt::Display for TokenStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenStrategy::None => write!(f, "none"),
            TokenStrategy::SlidingWindow => write!(f, "sliding_window"),
            TokenStrategy::Summarize => write!(f, "summarize"),
        }
    }
}

/// Token budget settings for one agent (or the engine default).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBudgetConfig {
    #[serde(default = "default_strategy")]
    pub strategy: TokenStrategy,
    /// Maximum tokens of history sent to the model.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// History size above which SUMMARIZE kicks in.
    #[serde(default = "default_summary_threshold")]
    pub summary_threshold: u32,
    /// Share of the budget held back as headroom for the summary itself.
    #[serde(default = "default_reserve_ratio")]
    pub reserve_ratio: f64,
}

fn default_strategy() -> TokenStrategy {
    TokenStrategy::SlidingWindow
}

fn default_max_tokens() -> u32 {
    4_000
}

fn default_summary_threshold() -> u32 {
    2_000
}

fn default_reserve_ratio() -> f64 {
    0.1
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            max_tokens: default_max_tokens(),
            summary_threshold: default_summary_threshold(),
            reserve_ratio: default_reserve_ratio(),
        }
    }
}

impl TokenBudgetConfig {
    /// Convenience constructor used heavily in tests and config defaults.
    pub fn new(strategy: TokenStrategy, max_tokens: u32) -> Self {
        Self {
            strategy,
            max_tokens,
            ..Self::default()
        }
    }

    /// Clamp the history budget to what the provider can actually accept.
    pub fn clamped_to(&self, max_context_tokens: u32) -> Self {
        Self {
            max_tokens: self.max_tokens.min(max_context_tokens),
            ..self.clone()
        }
    }
}
