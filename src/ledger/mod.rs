//! Ledger store: durable record of requests, invites, and invoices.
//!
//! This module defines the [`Ledger`] trait, the storage interface for the
//! settlement engine. The engine holds no in-process locks; every piece of
//! mutual exclusion it needs is delegated to the ledger's single atomic
//! conditional write, [`Ledger::commit_transition`], which is keyed on the
//! expected prior status. Implementations must make a failed precondition
//! ([`TadqiqError::PreconditionFailed`]) distinguishable from a missing
//! entity ([`TadqiqError::RequestNotFound`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    Invoice, InvoiceId, InvoiceStatus, InviteStatus, NewRequest, PoolInvite, Request, RequestId,
    RequestStatus, User, UserId,
};
use crate::error::Result;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryLedger;
#[cfg(feature = "postgres")]
pub use postgres::PostgresLedger;

/// Filter for request queries.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub client_id: Option<UserId>,
    pub expert_id: Option<UserId>,
    pub status: Option<RequestStatus>,
}

/// Filter for invoice queries.
#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub client_id: Option<UserId>,
}

/// Invoice to be created inside a transition commit.
///
/// The ledger assigns id, display id, and timestamps; client and currency
/// come from the owning request.
#[derive(Debug, Clone)]
pub struct InvoiceDraft {
    /// VAT-inclusive amount, already derived by the engine.
    pub amount: Decimal,
}

/// How outstanding invites resolve inside a transition commit.
#[derive(Debug, Clone)]
pub enum InviteResolution {
    /// The winner's invite (if any) becomes `Accepted`; every other
    /// outstanding invite becomes `Expired`.
    AcceptFor(UserId),
    /// Every outstanding invite becomes `Expired` (request left the pool
    /// without an acceptance, e.g. cancellation).
    ExpireAll,
}

/// The full effect of one state-machine transition, committed atomically.
///
/// Either everything here lands (status write, expert assignment, invoice
/// insert, invite resolution) or nothing does.
#[derive(Debug, Clone)]
pub struct TransitionEffects {
    pub new_status: RequestStatus,
    /// Expert to assign, for the pool-acceptance edge.
    pub assign_expert: Option<UserId>,
    /// Invoice to issue, for billable edges.
    pub issue_invoice: Option<InvoiceDraft>,
    /// Outstanding-invite resolution, for edges that take the request out
    /// of the pool.
    pub resolve_invites: Option<InviteResolution>,
}

impl TransitionEffects {
    /// A plain status move with no side effects.
    pub fn status_only(new_status: RequestStatus) -> Self {
        Self {
            new_status,
            assign_expert: None,
            issue_invoice: None,
            resolve_invites: None,
        }
    }
}

/// Storage trait for the settlement engine.
///
/// All request mutation after creation goes through `commit_transition`;
/// there is deliberately no general-purpose update method, so a stale
/// in-memory status can never silently overwrite a newer one.
#[async_trait]
pub trait Ledger: Send + Sync {
    // -- users ------------------------------------------------------------

    async fn create_user(&self, user: User) -> Result<()>;

    async fn get_user(&self, id: UserId) -> Result<User>;

    // -- requests ---------------------------------------------------------

    /// Create a request at its entry status and assign its display id.
    async fn create_request(&self, new: NewRequest, status: RequestStatus) -> Result<Request>;

    async fn get_request(&self, id: RequestId) -> Result<Request>;

    async fn query_requests(&self, filter: RequestFilter) -> Result<Vec<Request>>;

    /// The single atomic conditional write.
    ///
    /// Applies `effects` to the request only if its status still equals
    /// `expected`. On success returns the updated request. Fails with
    /// `RequestNotFound` if the id is unknown and `PreconditionFailed` if
    /// the status moved underneath the caller - the two cases are never
    /// conflated.
    ///
    /// Implementations must also maintain the assignment invariant: after
    /// the write, `expert_id` is set iff the new status requires an expert.
    async fn commit_transition(
        &self,
        id: RequestId,
        expected: RequestStatus,
        effects: TransitionEffects,
    ) -> Result<Request>;

    // -- invites ----------------------------------------------------------

    /// Create an invite for the (request, expert) pair. At most one invite
    /// may exist per pair; a second create fails validation.
    async fn create_invite(&self, request_id: RequestId, expert_id: UserId) -> Result<PoolInvite>;

    async fn invites_for_request(&self, request_id: RequestId) -> Result<Vec<PoolInvite>>;

    async fn invites_for_expert(&self, expert_id: UserId) -> Result<Vec<PoolInvite>>;

    /// Conditionally move one invite from `expected` to `to`.
    async fn set_invite_status(
        &self,
        request_id: RequestId,
        expert_id: UserId,
        expected: InviteStatus,
        to: InviteStatus,
    ) -> Result<PoolInvite>;

    // -- invoices ---------------------------------------------------------

    async fn get_invoice(&self, id: InvoiceId) -> Result<Invoice>;

    async fn query_invoices(&self, filter: InvoiceFilter) -> Result<Vec<Invoice>>;

    /// Conditionally move an invoice from `expected` to `to`. Status is the
    /// only invoice field that ever changes after issue.
    async fn set_invoice_status(
        &self,
        id: InvoiceId,
        expected: InvoiceStatus,
        to: InvoiceStatus,
    ) -> Result<Invoice>;
}

/// Clock shared by ledger implementations.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}
