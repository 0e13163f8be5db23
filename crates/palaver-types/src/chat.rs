//! Session, message, and conversation-context types for Palaver.
//!
//! A session binds one caller to one agent. Messages are persisted
//! append-only; the [`ConversationContext`] records which of them currently
//! form the model's prompt history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// A conversation between a caller and an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub agent_id: Uuid,
    /// Caller that opened the session.
    pub owner_id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(agent_id: Uuid, owner_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            agent_id,
            owner_id: owner_id.into(),
            title: None,
            created_at: Utc::now(),
        }
    }
}

/// Role of a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    /// A synthesized summary standing in for truncated older history.
    Summary,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
            Role::Summary => write!(f, "summary"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "summary" => Ok(Role::Summary),
            other => Err(format!("invalid role: '{other}'")),
        }
    }
}

/// What a persisted message represents on the session timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    ToolCall,
    SubAgentCallStart,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Text => write!(f, "text"),
            MessageKind::ToolCall => write!(f, "tool_call"),
            MessageKind::SubAgentCallStart => write!(f, "sub_agent_call_start"),
        }
    }
}

/// A single persisted message within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub file_refs: Vec<String>,
    /// Total tokens attributed to this message. For user messages this is
    /// the input-token count of the model call, replayed history included.
    pub token_count: u32,
    /// Tokens of the message body alone, excluding injected context. The
    /// basis for every context-window decision.
    pub body_token_count: u32,
    pub kind: MessageKind,
    /// Model that produced this message (assistant messages only).
    #[serde(default)]
    pub model_id: Option<String>,
    /// Provider that served the model call (assistant messages only).
    #[serde(default)]
    pub provider_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new text message with a fresh v7 id and zero token counts.
    pub fn new(session_id: Uuid, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            session_id,
            role,
            content: content.into(),
            file_refs: Vec::new(),
            token_count: 0,
            body_token_count: 0,
            kind: MessageKind::Text,
            model_id: None,
            provider_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_files(mut self, file_refs: Vec<String>) -> Self {
        self.file_refs = file_refs;
        self
    }

    pub fn with_tokens(mut self, token_count: u32) -> Self {
        self.token_count = token_count;
        self.body_token_count = token_count;
        self
    }
}

/// Per-session record of the messages currently forming the prompt history.
///
/// The active list is ordered; when hydrated it reconstructs the history sent
/// to the model. It is rewritten, not appended, when older messages are
/// replaced by a rolling summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub session_id: Uuid,
    pub active_message_ids: Vec<Uuid>,
    pub summary: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConversationContext {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            ..Self::default()
        }
    }
}
