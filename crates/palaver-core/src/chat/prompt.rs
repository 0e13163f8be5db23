//! Prompt materialization for a turn.
//!
//! The system prompt carries the agent's instructions plus its preset tool
//! parameters. History messages become role-appropriate chat entries; a
//! rolling summary leads them inside `<prior_summary>` tags so the model can
//! tell it apart from the verbatim conversation.

use palaver_types::agent::Agent;
use palaver_types::chat::{Message, Role};
use palaver_types::llm::ChatEntry;

/// Builds the prompt sent to the model for one turn.
pub struct PromptBuilder;

impl PromptBuilder {
    /// System prompt with a rendered preset-parameter section.
    ///
    /// Layout:
    /// ```text
    /// {agent system prompt}
    ///
    /// <preset_tool_parameters>
    /// Preset tool parameters (already applied to every call of these tools):
    /// - search: region=eu, safe=true
    /// </preset_tool_parameters>
    /// ```
    ///
    /// Returns `None` when there is nothing to say.
    pub fn system_prompt(agent: &Agent) -> Option<String> {
        let mut sections = Vec::with_capacity(2);

        if !agent.system_prompt.trim().is_empty() {
            sections.push(agent.system_prompt.trim().to_string());
        }

        let presets: Vec<String> = agent
            .tool_preset_params
            .iter()
            .filter(|(_, params)| !params.is_empty())
            .map(|(server, params)| {
                let pairs = params
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("- {server}: {pairs}")
            })
            .collect();

        if !presets.is_empty() {
            sections.push(format!(
                "<preset_tool_parameters>\nPreset tool parameters (already applied to every call of these tools):\n{}\n</preset_tool_parameters>",
                presets.join("\n")
            ));
        }

        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }

    /// Map persisted history to chat entries, in order.
    pub fn history_entries(history: &[Message]) -> Vec<ChatEntry> {
        history.iter().filter_map(Self::entry).collect()
    }

    fn entry(message: &Message) -> Option<ChatEntry> {
        match message.role {
            Role::Summary => Some(ChatEntry::system(format!(
                "<prior_summary>\n{}\n</prior_summary>",
                message.content
            ))),
            Role::User if !message.file_refs.is_empty() => Some(ChatEntry::user_with_files(
                message.content.clone(),
                message.file_refs.clone(),
            )),
            _ if message.content.is_empty() => None,
            Role::User => Some(ChatEntry::user(message.content.clone())),
            Role::Assistant => Some(ChatEntry::assistant(message.content.clone())),
            Role::System => Some(ChatEntry::system(message.content.clone())),
        }
    }
}
