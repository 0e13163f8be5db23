//! Rolling-summary generation through the turn's selected provider.
//!
//! `ProviderSummarizer` condenses the oldest run of a session's history into
//! one summary text when the SUMMARIZE strategy decides older messages must
//! leave the context window.

use palaver_types::chat::{Message, Role};
use palaver_types::llm::{ChatEntry, CompletionRequest, LlmError};

use super::box_provider::BoxLlmProvider;
use super::token_budget::{Summarize, SummaryText};

/// System prompt for the summarization call.
const SUMMARY_SYSTEM_PROMPT: &str = r#"Summarize the following conversation segment concisely. Preserve:
1. Key decisions and conclusions
2. Facts, names and figures the user provided
3. The user's current goals
4. Any unresolved questions or pending tool results

If a previous summary is included, fold it into the new summary instead of repeating it.
Write in third person ("The user asked...", "The assistant answered...")."#;

const SUMMARY_MAX_TOKENS: u32 = 1024;

/// Summarizes messages with one non-streaming completion.
pub struct ProviderSummarizer<'a> {
    provider: &'a BoxLlmProvider,
    model: &'a str,
}

impl<'a> ProviderSummarizer<'a> {
    pub fn new(provider: &'a BoxLlmProvider, model: &'a str) -> Self {
        Self { provider, model }
    }

    fn render(messages: &[Message]) -> String {
        messages
            .iter()
            .map(|m| match m.role {
                Role::Summary => format!("previous summary: {}", m.content),
                _ if m.file_refs.is_empty() => format!("{}: {}", m.role, m.content),
                _ => format!(
                    "{}: {} [files: {}]",
                    m.role,
                    m.content,
                    m.file_refs.join(", ")
                ),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl Summarize for ProviderSummarizer<'_> {
    #[tracing::instrument(
        name = "summarize_history",
        skip(self, messages),
        fields(model = %self.model, message_count = messages.len())
    )]
    async fn summarize(&self, messages: &[Message]) -> Result<SummaryText, LlmError> {
        if messages.is_empty() {
            return Ok(SummaryText {
                text: String::new(),
                token_count: 0,
            });
        }

        let request = CompletionRequest {
            model: self.model.to_string(),
            messages: vec![ChatEntry::user(format!(
                "Please summarize this conversation:\n\n<conversation>\n{}\n</conversation>",
                Self::render(messages)
            ))],
            system: Some(SUMMARY_SYSTEM_PROMPT.to_string()),
            max_tokens: SUMMARY_MAX_TOKENS,
            temperature: Some(0.0),
            tools: Vec::new(),
            stream: false,
        };

        let response = self.provider.complete(&request).await?;
        Ok(SummaryText {
            text: response.content.trim().to_string(),
            token_count: response.usage.output_tokens,
        })
    }
}
