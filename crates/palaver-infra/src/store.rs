//! In-memory [`ConversationStore`] backed by `dashmap`.
//!
//! Sessions, messages and contexts live for the lifetime of the process.
//! Messages are append-only; each session keeps its insertion order so the
//! full timeline can be listed independently of the active context.

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use palaver_core::chat::repository::ConversationStore;
use palaver_types::chat::{ConversationContext, Message, Session};
use palaver_types::error::RepositoryError;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    sessions: DashMap<Uuid, Session>,
    messages: DashMap<Uuid, Message>,
    /// Session id -> message ids in insertion order.
    timelines: DashMap<Uuid, Vec<Uuid>>,
    contexts: DashMap<Uuid, ConversationContext>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn require_session(&self, session_id: &Uuid) -> Result<(), RepositoryError> {
        if self.sessions.contains_key(session_id) {
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }
}

impl ConversationStore for InMemoryStore {
    async fn create_session(&self, session: &Session) -> Result<Session, RepositoryError> {
        match self.sessions.entry(session.id) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "session {} already exists",
                session.id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(session.clone());
                tracing::debug!(session_id = %session.id, agent_id = %session.agent_id, "Created session");
                Ok(session.clone())
            }
        }
    }

    async fn get_session(&self, session_id: &Uuid) -> Result<Option<Session>, RepositoryError> {
        Ok(self.sessions.get(session_id).map(|s| s.value().clone()))
    }

    async fn save_and_activate(&self, session_id: &Uuid, messages: &[Message]) -> Result<(), RepositoryError> {
        self.require_session(session_id)?;
        if messages.is_empty() {
            return Ok(());
        }

        for message in messages {
            if message.session_id != *session_id {
                return Err(RepositoryError::Query(format!(
                    "message {} belongs to session {}",
                    message.id, message.session_id
                )));
            }
        }

        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
        for message in messages {
            self.messages.insert(message.id, message.clone());
        }
        self.timelines
            .entry(*session_id)
            .or_default()
            .extend(ids.iter().copied());

        let mut context = self
            .contexts
            .entry(*session_id)
            .or_insert_with(|| ConversationContext::new(*session_id));
        context.active_message_ids.extend(ids);
        context.updated_at = Some(Utc::now());

        tracing::debug!(session_id = %session_id, count = messages.len(), "Saved and activated messages");
        Ok(())
    }

    async fn update_message(&self, message: &Message) -> Result<(), RepositoryError> {
        match self.messages.get_mut(&message.id) {
            Some(mut stored) => {
                *stored = message.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn load_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Message>, RepositoryError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.messages.get(id).map(|m| m.value().clone()))
            .collect())
    }

    async fn get_context(&self, session_id: &Uuid) -> Result<Option<ConversationContext>, RepositoryError> {
        Ok(self.contexts.get(session_id).map(|c| c.value().clone()))
    }

    async fn replace_context(&self, context: &ConversationContext) -> Result<(), RepositoryError> {
        self.require_session(&context.session_id)?;
        self.contexts.insert(context.session_id, context.clone());
        tracing::debug!(
            session_id = %context.session_id,
            active = context.active_message_ids.len(),
            "Replaced conversation context"
        );
        Ok(())
    }

    async fn list_messages(&self, session_id: &Uuid) -> Result<Vec<Message>, RepositoryError> {
        let ids = self
            .timelines
            .get(session_id)
            .map(|t| t.value().clone())
            .unwrap_or_default();
        self.load_by_ids(&ids).await
    }
}
