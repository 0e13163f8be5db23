//! Typed events pushed to a caller's output connection during a turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a chat event. Doubles as the SSE event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatEventKind {
    PartialText,
    EndOfText,
    ToolInvoked,
    SubAgentCallStarted,
    SubAgentCallComplete,
    SubAgentCallError,
    Error,
}

impl ChatEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatEventKind::PartialText => "partial_text",
            ChatEventKind::EndOfText => "end_of_text",
            ChatEventKind::ToolInvoked => "tool_invoked",
            ChatEventKind::SubAgentCallStarted => "sub_agent_call_started",
            ChatEventKind::SubAgentCallComplete => "sub_agent_call_complete",
            ChatEventKind::SubAgentCallError => "sub_agent_call_error",
            ChatEventKind::Error => "error",
        }
    }

    /// Whether this kind ends the turn on its connection.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEventKind::EndOfText | ChatEventKind::Error)
    }
}

impl fmt::Display for ChatEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event on a chat connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub kind: ChatEventKind,
    pub content: String,
    /// True on the event that ends the turn.
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChatEvent {
    pub fn new(kind: ChatEventKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            done: kind.is_terminal(),
            tool_name: None,
            timestamp: Utc::now(),
        }
    }

    pub fn partial_text(text: impl Into<String>) -> Self {
        Self::new(ChatEventKind::PartialText, text)
    }

    pub fn end_of_text(text: impl Into<String>) -> Self {
        Self::new(ChatEventKind::EndOfText, text)
    }

    pub fn tool_invoked(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            ..Self::new(ChatEventKind::ToolInvoked, content)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ChatEventKind::Error, message)
    }
}
