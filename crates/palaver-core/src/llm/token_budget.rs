//! Token budget management for a session's prompt history.
//!
//! Decides which persisted messages stay in the model's context window under
//! the configured [`TokenStrategy`]. Every decision is made on
//! `body_token_count`; `token_count` on user messages also contains the
//! replayed history and would be counted repeatedly.

use std::future::Future;

use palaver_types::budget::{TokenBudgetConfig, TokenStrategy};
use palaver_types::chat::{Message, Role};
use palaver_types::llm::LlmError;

/// Rough token estimate for text that has not been through a model yet.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
    chars.div_ceil(4)
}

/// Text produced by a summarization call.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryText {
    pub text: String,
    /// Output tokens reported by the model (0 when unknown).
    pub token_count: u32,
}

/// External collaborator that condenses a run of messages into a summary.
pub trait Summarize: Send + Sync {
    fn summarize(
        &self,
        messages: &[Message],
    ) -> impl Future<Output = Result<SummaryText, LlmError>> + Send;
}

/// Split decision for one history, before any summary text exists.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetPlan {
    /// Send these messages as-is.
    Keep(Vec<Message>),
    /// Replace `to_summarize` (the oldest run) with one summary message.
    Summarize {
        to_summarize: Vec<Message>,
        retained: Vec<Message>,
    },
}

/// Result of applying a strategy to a history.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetOutcome {
    pub retained: Vec<Message>,
    /// A freshly synthesized summary, ordered before `retained`.
    pub summary: Option<Message>,
}

impl BudgetOutcome {
    /// The prompt history: summary first, then retained messages in order.
    pub fn into_history(self) -> Vec<Message> {
        let mut history = Vec::with_capacity(self.retained.len() + 1);
        history.extend(self.summary);
        history.extend(self.retained);
        history
    }
}

/// Applies context-window strategies to message histories.
pub struct TokenBudgetManager;

impl TokenBudgetManager {
    /// Canonical history order.
    ///
    /// Messages are stably sorted by creation time, ties broken by id. Only
    /// the newest summary survives and it always leads the history.
    pub fn order(history: Vec<Message>) -> Vec<Message> {
        let (summaries, mut messages): (Vec<Message>, Vec<Message>) = history
            .into_iter()
            .partition(|m| m.role == Role::Summary);

        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let latest_summary = summaries
            .into_iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut ordered = Vec::with_capacity(messages.len() + 1);
        ordered.extend(latest_summary);
        ordered.extend(messages);
        ordered
    }

    pub fn total_tokens(messages: &[Message]) -> u64 {
        messages.iter().map(|m| u64::from(m.body_token_count)).sum()
    }

    /// Newest contiguous suffix whose tokens fit in `max_tokens`.
    ///
    /// Never splits a message, and never returns an empty window for a
    /// non-empty history: the newest message is kept even when it alone
    /// exceeds the budget.
    pub fn sliding_window(ordered: Vec<Message>, max_tokens: u32) -> Vec<Message> {
        let start = Self::window_start(&ordered, u64::from(max_tokens));
        ordered.into_iter().skip(start).collect()
    }

    fn window_start(ordered: &[Message], budget: u64) -> usize {
        if ordered.is_empty() {
            return 0;
        }
        let mut used = 0u64;
        let mut start = ordered.len();
        for (index, message) in ordered.iter().enumerate().rev() {
            let next = used + u64::from(message.body_token_count);
            if next > budget {
                break;
            }
            used = next;
            start = index;
        }
        start.min(ordered.len() - 1)
    }

    /// Decide the split point for `history` without calling any model.
    pub fn plan(history: Vec<Message>, config: &TokenBudgetConfig) -> BudgetPlan {
        let ordered = Self::order(history);

        match config.strategy {
            TokenStrategy::None => BudgetPlan::Keep(ordered),
            TokenStrategy::SlidingWindow => {
                BudgetPlan::Keep(Self::sliding_window(ordered, config.max_tokens))
            }
            TokenStrategy::Summarize => {
                let total = Self::total_tokens(&ordered);
                if total <= u64::from(config.summary_threshold) || ordered.len() < 2 {
                    return BudgetPlan::Keep(ordered);
                }

                let target = Self::summary_target(config);
                // Always summarize at least one message and keep at least one.
                let split = Self::window_start(&ordered, target).max(1);

                let mut to_summarize = ordered;
                let retained = to_summarize.split_off(split);
                BudgetPlan::Summarize {
                    to_summarize,
                    retained,
                }
            }
        }
    }

    fn summary_target(config: &TokenBudgetConfig) -> u64 {
        let ceiling = config.summary_threshold.min(config.max_tokens);
        let reserve = config.reserve_ratio.clamp(0.0, 1.0);
        (f64::from(ceiling) * (1.0 - reserve)).floor() as u64
    }

    /// Apply the configured strategy, producing a summary when needed.
    ///
    /// A failed summarization falls back to the sliding window for this turn.
    pub async fn apply<S: Summarize>(
        history: Vec<Message>,
        config: &TokenBudgetConfig,
        summarizer: &S,
    ) -> BudgetOutcome {
        match Self::plan(history, config) {
            BudgetPlan::Keep(retained) => BudgetOutcome {
                retained,
                summary: None,
            },
            BudgetPlan::Summarize {
                to_summarize,
                retained,
            } => match summarizer.summarize(&to_summarize).await {
                Ok(summary) => {
                    let session_id = to_summarize[0].session_id;
                    let tokens = if summary.token_count > 0 {
                        summary.token_count
                    } else {
                        estimate_tokens(&summary.text)
                    };
                    tracing::debug!(
                        session_id = %session_id,
                        summarized = to_summarize.len(),
                        retained = retained.len(),
                        "Replaced older history with summary"
                    );
                    BudgetOutcome {
                        retained,
                        summary: Some(
                            Message::new(session_id, Role::Summary, summary.text)
                                .with_tokens(tokens),
                        ),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Summarization failed, using sliding window");
                    let mut ordered = to_summarize;
                    ordered.extend(retained);
                    BudgetOutcome {
                        retained: Self::sliding_window(ordered, config.max_tokens),
                        summary: None,
                    }
                }
            },
        }
    }
}
