//! The request aggregate: the central entity of the marketplace.
//!
//! A request is created by a client, matched to an expert (directly or
//! through the open pool), and moves through its lifecycle exclusively via
//! state-machine transitions. It is never physically deleted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::UserId;

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        RequestId(uuid)
    }
}

impl std::ops::Deref for RequestId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Lifecycle status of a request.
///
/// This is the string value stored in the ledger's `status` column, and the
/// single point of contention for all concurrent writers: every mutation is
/// a conditional write keyed on the expected prior status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Created, awaiting client payment confirmation.
    PendingPayment,
    /// Paid and visible in the open pool, awaiting an expert.
    PendingAssignment,
    /// An expert won the assignment; work has not started.
    Matched,
    /// The assigned expert is working.
    InProgress,
    /// Deliverable submitted, awaiting the client's approval.
    ReviewClient,
    /// Client approved, awaiting the admin's final approval.
    ReviewAdmin,
    /// Terminal: delivered and billed.
    Completed,
    /// Frozen pending admin arbitration.
    Disputed,
    /// Terminal: withdrawn before completion.
    Cancelled,
}

impl RequestStatus {
    /// Stable string form, shared by serde, the ledger schema, and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::PendingPayment => "pending_payment",
            RequestStatus::PendingAssignment => "pending_assignment",
            RequestStatus::Matched => "matched",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::ReviewClient => "review_client",
            RequestStatus::ReviewAdmin => "review_admin",
            RequestStatus::Completed => "completed",
            RequestStatus::Disputed => "disputed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    /// Parse the stable string form back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending_payment" => RequestStatus::PendingPayment,
            "pending_assignment" => RequestStatus::PendingAssignment,
            "matched" => RequestStatus::Matched,
            "in_progress" => RequestStatus::InProgress,
            "review_client" => RequestStatus::ReviewClient,
            "review_admin" => RequestStatus::ReviewAdmin,
            "completed" => RequestStatus::Completed,
            "disputed" => RequestStatus::Disputed,
            "cancelled" => RequestStatus::Cancelled,
            _ => return None,
        })
    }

    /// True for statuses in which the request must have an assigned expert.
    ///
    /// Invariant: `request.expert_id.is_some()` iff this returns true.
    pub fn requires_expert(&self) -> bool {
        matches!(
            self,
            RequestStatus::Matched
                | RequestStatus::InProgress
                | RequestStatus::ReviewClient
                | RequestStatus::ReviewAdmin
                | RequestStatus::Completed
                | RequestStatus::Disputed
        )
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }

    /// Statuses excluded from a client's spend aggregate: nothing has been
    /// (or will ever be) owed for these.
    pub fn counts_toward_spend(&self) -> bool {
        !matches!(
            self,
            RequestStatus::PendingPayment | RequestStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the client is buying: a fixed pricing plan, a catalogue service, or
/// a free-text custom engagement.
///
/// The invoice description resolves from this in priority order: plan name,
/// else service name, else the custom description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Offering {
    Plan { id: Uuid, name: String },
    Service { id: Uuid, name: String },
    Custom { description: String },
}

impl Offering {
    /// Human-readable description for invoices and listings.
    pub fn label(&self) -> &str {
        match self {
            Offering::Plan { name, .. } => name,
            Offering::Service { name, .. } => name,
            Offering::Custom { description } => description,
        }
    }
}

/// A service request in the marketplace.
///
/// `base_amount` is the VAT-exclusive price fixed at creation; every
/// VAT-inclusive figure anywhere in the system is derived from it, never
/// stored as a competing source of truth (the one exception is the frozen
/// amount on an issued invoice, which deliberately snapshots the derivation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    /// Human-readable identifier, e.g. "REQ-000042". Assigned by the ledger.
    pub display_id: String,
    pub client_id: UserId,
    /// Set exactly while the status is one of the assigned states.
    pub expert_id: Option<UserId>,
    pub offering: Offering,
    /// VAT-exclusive price, immutable once set.
    pub base_amount: Decimal,
    /// Three-letter currency code, e.g. "SAR".
    pub currency: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
}

impl Request {
    /// Check the expert-assignment invariant for this request's status.
    pub fn assignment_invariant_holds(&self) -> bool {
        self.expert_id.is_some() == self.status.requires_expert()
    }
}

/// Input for creating a new request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRequest {
    pub client_id: UserId,
    pub offering: Offering,
    /// VAT-exclusive base price.
    pub base_amount: Decimal,
    /// Defaults to the engine's configured currency when `None`.
    pub currency: Option<String>,
}
