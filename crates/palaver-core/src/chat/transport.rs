//! Output connections for chat turns.
//!
//! Two transports exist: push-streaming, where many events flow to a caller
//! that does not block, and single-shot, where the caller waits for exactly
//! one final event. Both are closed at most once, after which every send is
//! dropped silently; late events from a superseded turn land here.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use palaver_types::event::ChatEvent;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

/// Deadline used when the configured timeout cannot be represented.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

/// One live output connection for a turn.
pub trait ChatConnection: Send + Sync {
    fn id(&self) -> Uuid;

    /// Instant past which the turn must fail with a timeout.
    fn deadline(&self) -> Instant;

    /// Push a non-terminal event. Returns false once the connection is closed.
    fn send(&self, event: ChatEvent) -> bool;

    /// Deliver the terminal event and close.
    fn send_final(&self, event: ChatEvent);

    /// Close without a terminal event. Used when a newer stream takes over.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Frames delivered on a push-streaming connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(ChatEvent),
    /// The connection is finished; no frame follows.
    Complete,
}

/// Push-streaming connection over an unbounded channel.
pub struct StreamConnection {
    id: Uuid,
    deadline: Instant,
    tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
}

impl StreamConnection {
    fn take(&self) -> Option<mpsc::UnboundedSender<Frame>> {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl ChatConnection for StreamConnection {
    fn id(&self) -> Uuid {
        self.id
    }

    fn deadline(&self) -> Instant {
        self.deadline
    }

    fn send(&self, event: ChatEvent) -> bool {
        match self.tx.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(tx) => tx.send(Frame::Event(event)).is_ok(),
            None => false,
        }
    }

    fn send_final(&self, event: ChatEvent) {
        if let Some(tx) = self.take() {
            let _ = tx.send(Frame::Event(event));
            let _ = tx.send(Frame::Complete);
        }
    }

    fn close(&self) {
        if let Some(tx) = self.take() {
            let _ = tx.send(Frame::Complete);
        }
    }

    fn is_closed(&self) -> bool {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

/// How a single-shot connection was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum SingleShotOutcome {
    Final(ChatEvent),
    /// Closed without a final event (superseded).
    Closed,
}

/// Single-shot connection: partial events are dropped, the final one resolves
/// the waiting caller.
pub struct SingleShotConnection {
    id: Uuid,
    deadline: Instant,
    tx: Mutex<Option<oneshot::Sender<SingleShotOutcome>>>,
}

impl SingleShotConnection {
    fn resolve(&self, outcome: SingleShotOutcome) {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(tx) = tx {
            let _ = tx.send(outcome);
        }
    }
}

impl ChatConnection for SingleShotConnection {
    fn id(&self) -> Uuid {
        self.id
    }

    fn deadline(&self) -> Instant {
        self.deadline
    }

    fn send(&self, _event: ChatEvent) -> bool {
        !self.is_closed()
    }

    fn send_final(&self, event: ChatEvent) {
        self.resolve(SingleShotOutcome::Final(event));
    }

    fn close(&self) {
        self.resolve(SingleShotOutcome::Closed);
    }

    fn is_closed(&self) -> bool {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

/// Factory for output connections.
pub trait Transport {
    /// The caller's end of the connection.
    type Output;

    fn open(&self, timeout: Duration) -> (Arc<dyn ChatConnection>, Self::Output);
}

/// Push-streaming transport.
pub struct PushTransport;

impl Transport for PushTransport {
    type Output = mpsc::UnboundedReceiver<Frame>;

    fn open(&self, timeout: Duration) -> (Arc<dyn ChatConnection>, Self::Output) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = StreamConnection {
            id: Uuid::now_v7(),
            deadline: deadline_after(timeout),
            tx: Mutex::new(Some(tx)),
        };
        (Arc::new(connection), rx)
    }
}

/// Single-shot transport.
pub struct SingleShotTransport;

impl Transport for SingleShotTransport {
    type Output = oneshot::Receiver<SingleShotOutcome>;

    fn open(&self, timeout: Duration) -> (Arc<dyn ChatConnection>, Self::Output) {
        let (tx, rx) = oneshot::channel();
        let connection = SingleShotConnection {
            id: Uuid::now_v7(),
            deadline: deadline_after(timeout),
            tx: Mutex::new(Some(tx)),
        };
        (Arc::new(connection), rx)
    }
}
