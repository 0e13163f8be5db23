//! ConversationStore trait definition.
//!
//! Durable storage for sessions, messages, and each session's active-message
//! context. The engine treats every call as durable and synchronous.

use palaver_types::chat::{ConversationContext, Message, Session};
use palaver_types::error::RepositoryError;
use uuid::Uuid;

/// Repository trait for sessions, messages, and conversation contexts.
///
/// Implementations live in palaver-infra (e.g., `InMemoryStore`).
pub trait ConversationStore: Send + Sync {
    fn create_session(
        &self,
        session: &Session,
    ) -> impl std::future::Future<Output = Result<Session, RepositoryError>> + Send;

    fn get_session(
        &self,
        session_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Session>, RepositoryError>> + Send;

    /// Persist `messages` and append their ids, in order, to the session's
    /// active-message list. Creates the context lazily.
    fn save_and_activate(
        &self,
        session_id: &Uuid,
        messages: &[Message],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace a stored message (token backfill only).
    fn update_message(
        &self,
        message: &Message,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load messages by id, returned in the order of `ids`. Unknown ids are skipped.
    fn load_by_ids(
        &self,
        ids: &[Uuid],
    ) -> impl std::future::Future<Output = Result<Vec<Message>, RepositoryError>> + Send;

    fn get_context(
        &self,
        session_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ConversationContext>, RepositoryError>> + Send;

    /// Overwrite the session's context (used when a summary replaces history).
    fn replace_context(
        &self,
        context: &ConversationContext,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Every message persisted for a session, oldest first.
    fn list_messages(
        &self,
        session_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, RepositoryError>> + Send;
}
