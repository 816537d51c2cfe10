//! Error types for the settlement engine.

use thiserror::Error;

use crate::domain::{InvoiceId, InvoiceStatus, RequestId, RequestStatus, UserId};

/// Result type alias using the tadqiq error type.
pub type Result<T> = std::result::Result<T, TadqiqError>;

/// Main error type for the settlement engine.
///
/// Every variant except `Storage` is an expected, recoverable-by-caller
/// condition. `Storage` wraps infrastructural failures (connectivity,
/// decoding at the storage boundary) and is the only class that should
/// surface as an opaque internal error; the ledger's conditional writes
/// guarantee no partial state was committed when it is returned.
#[derive(Error, Debug)]
pub enum TadqiqError {
    /// Request not found
    #[error("request not found: {0}")]
    RequestNotFound(RequestId),

    /// Invoice not found
    #[error("invoice not found: {0}")]
    InvoiceNotFound(InvoiceId),

    /// User not found
    #[error("user not found: {0}")]
    UserNotFound(UserId),

    /// No invite exists for this (request, expert) pair
    #[error("no invite for expert {expert} on request {request}")]
    InviteNotFound { request: RequestId, expert: UserId },

    /// The requested edge is not allowed from the request's current status.
    #[error("invalid transition: request {request} is '{from}', cannot {edge}")]
    InvalidTransition {
        request: RequestId,
        from: RequestStatus,
        edge: &'static str,
    },

    /// Pool acceptance race lost: another expert already took the request.
    #[error("request {0} was already taken by another expert")]
    AlreadyMatched(RequestId),

    /// The invoice is not in a state that allows the requested status change.
    #[error("invoice {invoice} is '{from}', cannot {edge}")]
    InvalidInvoiceTransition {
        invoice: InvoiceId,
        from: InvoiceStatus,
        edge: &'static str,
    },

    /// The actor's role lacks visibility or authority for this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A conditional write failed because the entity was modified concurrently.
    ///
    /// Distinct from `AlreadyMatched`: this covers every optimistic-concurrency
    /// conflict other than a pool acceptance race.
    #[error("request {0} was modified concurrently, re-read and retry")]
    PreconditionFailed(RequestId),

    /// Input rejected before reaching the ledger (negative amount, empty field).
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error at the storage boundary
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Infrastructural storage failure
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RequestId;
    use uuid::Uuid;

    #[test]
    fn race_loss_message_is_actionable() {
        let err = TadqiqError::AlreadyMatched(RequestId(Uuid::nil()));
        assert!(err.to_string().contains("already taken"));
    }

    #[test]
    fn invalid_transition_names_the_edge() {
        let err = TadqiqError::InvalidTransition {
            request: RequestId(Uuid::nil()),
            from: RequestStatus::PendingPayment,
            edge: "approve",
        };
        let msg = err.to_string();
        assert!(msg.contains("pending_payment"));
        assert!(msg.contains("approve"));
    }
}
