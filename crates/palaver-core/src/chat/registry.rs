//! Stream session registry: at most one authoritative live stream per session.
//!
//! Owned by one long-lived engine instance. A newer top-level stream for a
//! session preempts the older one: the old state is cancelled and its
//! connection completed without an error event. Nested tool execution looks
//! the live connection up here to emit side-channel progress events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::transport::ChatConnection;

/// Bookkeeping for one live stream.
pub struct StreamState {
    pub stream_id: Uuid,
    pub connection: Arc<dyn ChatConnection>,
    cancellation: CancellationToken,
    completed: AtomicBool,
    partial: Mutex<String>,
}

impl StreamState {
    pub fn new(connection: Arc<dyn ChatConnection>) -> Self {
        Self {
            stream_id: Uuid::now_v7(),
            connection,
            cancellation: CancellationToken::new(),
            completed: AtomicBool::new(false),
            partial: Mutex::new(String::new()),
        }
    }

    /// False once a newer stream has taken over the session.
    pub fn is_active(&self) -> bool {
        !self.cancellation.is_cancelled()
    }

    /// Resolves when the stream is superseded.
    pub async fn superseded(&self) {
        self.cancellation.cancelled().await
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub fn mark_completed(&self) {
        self.completed.store(true, Ordering::Release);
    }

    pub fn append_partial(&self, text: &str) {
        self.partial
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_str(text);
    }

    /// Take the accumulated partial text, leaving it empty.
    pub fn take_partial(&self) -> String {
        std::mem::take(&mut *self.partial.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn interrupt(&self) {
        self.cancellation.cancel();
        self.connection.close();
    }
}

impl std::fmt::Debug for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamState")
            .field("stream_id", &self.stream_id)
            .field("connection", &self.connection.id())
            .field("active", &self.is_active())
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Session id -> live stream.
#[derive(Default)]
pub struct StreamSessionRegistry {
    sessions: DashMap<Uuid, Arc<StreamState>>,
}

impl StreamSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new live stream for `session_id`, interrupting any previous
    /// one first. Check-and-replace happens under the entry lock.
    pub fn register(&self, session_id: Uuid, connection: Arc<dyn ChatConnection>) -> Arc<StreamState> {
        let state = Arc::new(StreamState::new(connection));
        match self.sessions.entry(session_id) {
            Entry::Occupied(mut entry) => {
                let previous = entry.get();
                if !previous.is_completed() {
                    tracing::info!(
                        session_id = %session_id,
                        stream_id = %previous.stream_id,
                        "Interrupting superseded stream"
                    );
                }
                previous.interrupt();
                entry.insert(Arc::clone(&state));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&state));
            }
        }
        state
    }

    /// The live connection for a session, if a stream is active.
    pub fn get(&self, session_id: &Uuid) -> Option<Arc<dyn ChatConnection>> {
        self.sessions
            .get(session_id)
            .filter(|state| state.is_active() && !state.is_completed())
            .map(|state| Arc::clone(&state.connection))
    }

    pub fn state(&self, session_id: &Uuid) -> Option<Arc<StreamState>> {
        self.sessions.get(session_id).map(|state| state.value().clone())
    }

    /// Interrupt and remove the session's stream. Returns whether one existed.
    pub fn interrupt_existing(&self, session_id: &Uuid) -> bool {
        match self.sessions.remove(session_id) {
            Some((_, state)) => {
                tracing::info!(session_id = %session_id, stream_id = %state.stream_id, "Stream interrupted");
                state.interrupt();
                true
            }
            None => false,
        }
    }

    /// Remove `state` once its turn is over. A newer stream registered for
    /// the same session is left untouched.
    pub fn release(&self, session_id: &Uuid, state: &StreamState) {
        state.mark_completed();
        self.sessions
            .remove_if(session_id, |_, current| current.stream_id == state.stream_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
