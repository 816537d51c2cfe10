//! Notification emitter boundary.
//!
//! The engine hands lifecycle events to a [`Notifier`] after the state
//! change has committed. Delivery is fire-and-forget: an emitter failure is
//! logged and swallowed, it never rolls back a committed transition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::UserId;
use crate::error::Result;

/// Kinds of lifecycle events delivered to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An admin invited this expert to a pooled request.
    InviteReceived,
    /// The request was matched to an expert.
    RequestMatched,
    /// A non-terminal lifecycle step (work started, deliverable submitted,
    /// approval recorded).
    StatusChanged,
    /// The request completed and its invoice was issued.
    RequestCompleted,
    /// An invoice was issued to this client.
    InvoiceIssued,
    DisputeOpened,
    DisputeResolved,
    RequestCancelled,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::InviteReceived => "invite_received",
            EventKind::RequestMatched => "request_matched",
            EventKind::StatusChanged => "status_changed",
            EventKind::RequestCompleted => "request_completed",
            EventKind::InvoiceIssued => "invoice_issued",
            EventKind::DisputeOpened => "dispute_opened",
            EventKind::DisputeResolved => "dispute_resolved",
            EventKind::RequestCancelled => "request_cancelled",
        };
        f.write_str(s)
    }
}

/// Trait for delivering lifecycle events to users.
///
/// Implementations wrap the real delivery channel (email, push). The engine
/// only ever calls this after a commit, and ignores failures beyond logging.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn emit(&self, user_id: UserId, event: EventKind, payload: serde_json::Value)
        -> Result<()>;
}

/// Notifier that drops every event. Production wiring replaces this.
#[derive(Debug, Default, Clone)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn emit(
        &self,
        _user_id: UserId,
        _event: EventKind,
        _payload: serde_json::Value,
    ) -> Result<()> {
        Ok(())
    }
}

/// A recorded emission, for test assertions.
#[derive(Debug, Clone)]
pub struct EmittedEvent {
    pub user_id: UserId,
    pub event: EventKind,
    pub payload: serde_json::Value,
}

/// Notifier that records every emission for later inspection.
///
/// # Example
/// ```ignore
/// let notifier = Arc::new(RecordingNotifier::default());
/// // ... run transitions ...
/// assert_eq!(notifier.count_for(client_id, EventKind::InvoiceIssued), 1);
/// ```
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    calls: std::sync::Mutex<Vec<EmittedEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All emissions so far, in order.
    pub fn emitted(&self) -> Vec<EmittedEvent> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of emissions of `event` addressed to `user_id`.
    pub fn count_for(&self, user_id: UserId, event: EventKind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.user_id == user_id && e.event == event)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn emit(
        &self,
        user_id: UserId,
        event: EventKind,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(EmittedEvent {
            user_id,
            event,
            payload,
        });
        Ok(())
    }
}
