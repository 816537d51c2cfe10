//! Request state machine.
//!
//! Owns the transition table: which edges exist, who may drive them, and
//! which side effects (invoice issue, invite resolution, notifications)
//! each edge triggers. Status and side effects commit together through the
//! ledger's atomic conditional write; notifications go out only after the
//! commit and never roll it back.
//!
//! ```text
//! PendingPayment ──confirm_payment──> PendingAssignment ──accept──> Matched
//!       │                                   │                          │
//!       │                                   │                     start_work
//!       │                                   │                          │
//!       │                                   │                          ▼
//!       │                                   │                     InProgress ──submit──> ReviewClient
//!       │                                   │                          │                      │
//!       │                                   │                          │               client_approve
//!       │                                   │                          │                      │
//!       │                                   │                          │                      ▼
//!       │                                   │                          │                 ReviewAdmin ──admin_approve──> Completed*
//!       │                                   │                          │                      │
//!       └──────────cancel───────────────────┴──────(also Matched)      └────── dispute ───────┘
//!                     │                                                              │
//!                     ▼                                                              ▼
//!                 Cancelled                                                      Disputed ──resolve──> Completed* | Cancelled
//!
//! * completion issues the invoice
//! ```
//!
//! The `accept` edge lives in [`crate::pool::PoolMatcher`]; everything else
//! is here.

use std::sync::Arc;

use metrics::counter;

use crate::config::EngineConfig;
use crate::domain::{Actor, NewRequest, Request, RequestId, RequestStatus, Role};
use crate::error::{Result, TadqiqError};
use crate::ledger::{InviteResolution, InvoiceDraft, Ledger, TransitionEffects};
use crate::money::VatCalculator;
use crate::notify::{EventKind, Notifier};

/// Outcome an admin chooses when resolving a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeOutcome {
    /// The work stands: complete and bill as normal.
    Completed,
    /// The engagement is unwound without billing.
    Cancelled,
}

/// A requested edge of the state machine.
///
/// The pool-acceptance edge is not here: acceptance is arbitrated by the
/// pool matcher, which owns the race semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Client confirms payment: `PendingPayment -> PendingAssignment`.
    ConfirmPayment,
    /// Expert starts work: `Matched -> InProgress`.
    StartWork,
    /// Expert submits the deliverable: `InProgress -> ReviewClient`.
    SubmitForReview,
    /// Client approves: `ReviewClient -> ReviewAdmin`, or straight to
    /// `Completed` when admin review is disabled.
    ClientApprove,
    /// Admin approves: `ReviewAdmin -> Completed`. Issues the invoice.
    AdminApprove,
    /// Any involved party freezes the request for arbitration.
    Dispute,
    /// Admin resolves a dispute to the chosen terminal state.
    ResolveDispute(DisputeOutcome),
    /// Client or admin withdraws the request before work starts.
    Cancel,
}

impl Transition {
    /// Edge name for errors, logs, and counters.
    pub fn name(&self) -> &'static str {
        match self {
            Transition::ConfirmPayment => "confirm_payment",
            Transition::StartWork => "start_work",
            Transition::SubmitForReview => "submit_for_review",
            Transition::ClientApprove => "client_approve",
            Transition::AdminApprove => "admin_approve",
            Transition::Dispute => "dispute",
            Transition::ResolveDispute(_) => "resolve_dispute",
            Transition::Cancel => "cancel",
        }
    }

    /// Statuses this edge is allowed to leave from.
    fn allowed_from(&self) -> &'static [RequestStatus] {
        use RequestStatus::*;
        match self {
            Transition::ConfirmPayment => &[PendingPayment],
            Transition::StartWork => &[Matched],
            Transition::SubmitForReview => &[InProgress],
            Transition::ClientApprove => &[ReviewClient],
            Transition::AdminApprove => &[ReviewAdmin],
            Transition::Dispute => &[InProgress, ReviewClient, ReviewAdmin],
            Transition::ResolveDispute(_) => &[Disputed],
            Transition::Cancel => &[PendingPayment, PendingAssignment, Matched],
        }
    }

    /// Target status, given the engine's review policy.
    fn target(&self, config: &EngineConfig) -> RequestStatus {
        use RequestStatus::*;
        match self {
            Transition::ConfirmPayment => PendingAssignment,
            Transition::StartWork => InProgress,
            Transition::SubmitForReview => ReviewClient,
            Transition::ClientApprove => {
                if config.admin_review {
                    ReviewAdmin
                } else {
                    Completed
                }
            }
            Transition::AdminApprove => Completed,
            Transition::Dispute => Disputed,
            Transition::ResolveDispute(DisputeOutcome::Completed) => Completed,
            Transition::ResolveDispute(DisputeOutcome::Cancelled) => Cancelled,
            Transition::Cancel => Cancelled,
        }
    }
}

/// The request lifecycle engine.
///
/// Stateless apart from its handles: all mutual exclusion is delegated to
/// the ledger's conditional writes, so any number of engine instances (or
/// clones) may serve concurrent callers against the same store.
pub struct Engine {
    ledger: Arc<dyn Ledger>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
    vat: VatCalculator,
}

impl Engine {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        let vat = VatCalculator::new(config.vat_rate);
        Self {
            ledger,
            notifier,
            config,
            vat,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn vat(&self) -> &VatCalculator {
        &self.vat
    }

    /// Submit a new request.
    ///
    /// Clients submit for themselves; admins may submit on a client's
    /// behalf. Entry status follows the payment policy.
    #[tracing::instrument(skip(self, new), fields(client_id = %new.client_id))]
    pub async fn submit(&self, actor: Actor, mut new: NewRequest) -> Result<Request> {
        match actor.role {
            Role::Client if actor.user_id == new.client_id => {}
            Role::Admin => {}
            Role::Client => {
                return Err(TadqiqError::Forbidden(
                    "clients may only submit their own requests".into(),
                ))
            }
            Role::Expert => {
                return Err(TadqiqError::Forbidden(
                    "experts may not submit requests".into(),
                ))
            }
        }

        if new.base_amount.is_sign_negative() {
            return Err(TadqiqError::Validation(
                "base amount must not be negative".into(),
            ));
        }
        if new.currency.is_none() {
            new.currency = Some(self.config.currency.clone());
        }

        let status = if self.config.paid_on_creation {
            RequestStatus::PendingAssignment
        } else {
            RequestStatus::PendingPayment
        };

        let request = self.ledger.create_request(new, status).await?;
        tracing::info!(
            request_id = %request.id,
            display_id = %request.display_id,
            status = %request.status,
            "request submitted"
        );
        Ok(request)
    }

    /// Drive one edge of the state machine.
    ///
    /// Validates actor authority and the edge against the *current* status,
    /// then commits conditionally on that same status: if another actor
    /// moved the request in between, the commit fails with
    /// `PreconditionFailed` and no side effect lands.
    #[tracing::instrument(skip(self), fields(request_id = %request_id, edge = transition.name(), role = %actor.role))]
    pub async fn transition(
        &self,
        actor: Actor,
        request_id: RequestId,
        transition: Transition,
    ) -> Result<Request> {
        let request = self.ledger.get_request(request_id).await?;

        self.authorize(&actor, &request, &transition)?;

        if !transition.allowed_from().contains(&request.status) {
            return Err(TadqiqError::InvalidTransition {
                request: request_id,
                from: request.status,
                edge: transition.name(),
            });
        }

        let target = transition.target(&self.config);
        let effects = self.effects_for(&request, target);

        let updated = self
            .ledger
            .commit_transition(request_id, request.status, effects)
            .await?;

        counter!(
            "tadqiq_transitions_total",
            "edge" => transition.name(),
            "to" => target.as_str()
        )
        .increment(1);
        tracing::info!(
            request_id = %request_id,
            from = %request.status,
            to = %updated.status,
            "transition committed"
        );

        self.notify_after(&actor, &request, &updated, &transition).await;

        Ok(updated)
    }

    /// Role-authority table. Mirrors the edges: clients confirm, approve,
    /// cancel, and dispute their own requests; experts start, submit, and
    /// dispute requests assigned to them; admins may drive any edge.
    fn authorize(&self, actor: &Actor, request: &Request, transition: &Transition) -> Result<()> {
        if actor.is_admin() {
            return Ok(());
        }

        let owns = actor.role == Role::Client && actor.user_id == request.client_id;
        let assigned = actor.role == Role::Expert && request.expert_id == Some(actor.user_id);

        let allowed = match transition {
            Transition::ConfirmPayment | Transition::ClientApprove | Transition::Cancel => owns,
            Transition::StartWork | Transition::SubmitForReview => assigned,
            Transition::Dispute => owns || assigned,
            Transition::AdminApprove | Transition::ResolveDispute(_) => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(TadqiqError::Forbidden(format!(
                "{} {} may not {} request {}",
                actor.role,
                actor.user_id,
                transition.name(),
                request.display_id
            )))
        }
    }

    /// Side effects that must commit atomically with the status write.
    fn effects_for(&self, request: &Request, target: RequestStatus) -> TransitionEffects {
        let mut effects = TransitionEffects::status_only(target);

        // Billing: completing a request issues its invoice, whether the
        // completion came through approval or dispute resolution.
        if target == RequestStatus::Completed {
            effects.issue_invoice = Some(InvoiceDraft {
                amount: self.vat.to_inclusive(request.base_amount),
            });
        }

        // Leaving the pool without an acceptance expires outstanding invites.
        if request.status == RequestStatus::PendingAssignment
            && target == RequestStatus::Cancelled
        {
            effects.resolve_invites = Some(InviteResolution::ExpireAll);
        }

        effects
    }

    /// Post-commit notifications. Failures are logged, never propagated.
    async fn notify_after(
        &self,
        actor: &Actor,
        before: &Request,
        after: &Request,
        transition: &Transition,
    ) {
        let payload = serde_json::json!({
            "request_id": after.id,
            "display_id": after.display_id,
            "status": after.status,
        });

        let mut sends: Vec<(crate::domain::UserId, EventKind)> = Vec::new();
        match transition {
            Transition::ConfirmPayment => {}
            Transition::StartWork | Transition::SubmitForReview => {
                sends.push((after.client_id, EventKind::StatusChanged));
            }
            Transition::ClientApprove => {
                if after.status == RequestStatus::Completed {
                    sends.push((after.client_id, EventKind::RequestCompleted));
                    sends.push((after.client_id, EventKind::InvoiceIssued));
                    if let Some(expert) = after.expert_id {
                        sends.push((expert, EventKind::RequestCompleted));
                    }
                } else if let Some(expert) = after.expert_id {
                    sends.push((expert, EventKind::StatusChanged));
                }
            }
            Transition::AdminApprove => {
                sends.push((after.client_id, EventKind::RequestCompleted));
                sends.push((after.client_id, EventKind::InvoiceIssued));
                if let Some(expert) = after.expert_id {
                    sends.push((expert, EventKind::RequestCompleted));
                }
            }
            Transition::Dispute => {
                sends.push((after.client_id, EventKind::DisputeOpened));
                if let Some(expert) = after.expert_id {
                    sends.push((expert, EventKind::DisputeOpened));
                }
            }
            Transition::ResolveDispute(outcome) => {
                sends.push((after.client_id, EventKind::DisputeResolved));
                // The expert is cleared from a cancelled request; notify the
                // one who was assigned when the dispute was open.
                if let Some(expert) = before.expert_id {
                    sends.push((expert, EventKind::DisputeResolved));
                }
                if *outcome == DisputeOutcome::Completed {
                    sends.push((after.client_id, EventKind::InvoiceIssued));
                }
            }
            Transition::Cancel => {
                if let Some(expert) = before.expert_id {
                    sends.push((expert, EventKind::RequestCancelled));
                }
                if actor.user_id != after.client_id {
                    sends.push((after.client_id, EventKind::RequestCancelled));
                }
            }
        }

        for (user_id, event) in sends {
            if let Err(e) = self.notifier.emit(user_id, event, payload.clone()).await {
                tracing::warn!(
                    user_id = %user_id,
                    event = %event,
                    error = %e,
                    "notification failed after committed transition"
                );
            }
        }
    }
}
