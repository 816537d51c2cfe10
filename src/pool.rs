//! Pool matcher: expert visibility and acceptance-race arbitration.
//!
//! The pool is the set of unassigned requests an approved expert may claim.
//! Acceptance is a single conditional write against the ledger; under N
//! racing accepts exactly one commits and the rest observe a race loss.

use std::sync::Arc;

use metrics::counter;

use crate::config::EngineConfig;
use crate::domain::{
    Actor, InviteStatus, PoolInvite, Request, RequestId, RequestStatus, Role, UserId,
};
use crate::error::{Result, TadqiqError};
use crate::ledger::{InviteResolution, Ledger, RequestFilter, TransitionEffects};
use crate::notify::{EventKind, Notifier};

/// Arbitrates which experts see which unassigned requests, and who wins a
/// contested acceptance.
pub struct PoolMatcher {
    ledger: Arc<dyn Ledger>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl PoolMatcher {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            notifier,
            config,
        }
    }

    /// Resolve the actor to an approved expert, or refuse.
    async fn require_approved_expert(&self, actor: &Actor) -> Result<UserId> {
        if actor.role != Role::Expert {
            return Err(TadqiqError::Forbidden(
                "only experts may work the pool".into(),
            ));
        }
        let user = self.ledger.get_user(actor.user_id).await?;
        match user.as_expert() {
            Some(data) if data.approved => Ok(user.id),
            Some(_) => Err(TadqiqError::Forbidden(
                "expert account is not yet approved".into(),
            )),
            None => Err(TadqiqError::Forbidden(
                "only experts may work the pool".into(),
            )),
        }
    }

    /// The requests this expert may currently claim: everything in open
    /// assignment, unioned with requests carrying a live targeted invite.
    /// Newest first, so the freshest demand surfaces on top.
    #[tracing::instrument(skip(self), fields(expert_id = %actor.user_id))]
    pub async fn list_pool(&self, actor: Actor) -> Result<Vec<Request>> {
        let expert_id = self.require_approved_expert(&actor).await?;

        let mut pool = self
            .ledger
            .query_requests(RequestFilter {
                status: Some(RequestStatus::PendingAssignment),
                ..RequestFilter::default()
            })
            .await?;

        // Targeted invites extend visibility; stale ones are filtered here
        // rather than expired by a timer.
        let now = chrono::Utc::now();
        let ttl = self.config.invite_ttl();
        for invite in self.ledger.invites_for_expert(expert_id).await? {
            if !invite.is_live(now, ttl) {
                continue;
            }
            if pool.iter().any(|r| r.id == invite.request_id) {
                continue;
            }
            let request = self.ledger.get_request(invite.request_id).await?;
            if request.status == RequestStatus::PendingAssignment {
                pool.push(request);
            }
        }

        pool.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pool)
    }

    /// Claim a pooled request for this expert.
    ///
    /// Equivalent to "move from `PendingAssignment` to `Matched` and assign
    /// me, only if still `PendingAssignment`" as one atomic unit, which also
    /// accepts this expert's invite and expires every sibling invite. Losing
    /// the race returns [`TadqiqError::AlreadyMatched`]; callers must report
    /// it, not retry.
    #[tracing::instrument(skip(self), fields(request_id = %request_id, expert_id = %actor.user_id))]
    pub async fn accept(&self, request_id: RequestId, actor: Actor) -> Result<Request> {
        let expert_id = self.require_approved_expert(&actor).await?;

        let effects = TransitionEffects {
            new_status: RequestStatus::Matched,
            assign_expert: Some(expert_id),
            issue_invoice: None,
            resolve_invites: Some(InviteResolution::AcceptFor(expert_id)),
        };

        let updated = self
            .ledger
            .commit_transition(request_id, RequestStatus::PendingAssignment, effects)
            .await
            .map_err(|e| match e {
                // The conditional write lost: someone else got there first.
                TadqiqError::PreconditionFailed(id) => {
                    counter!("tadqiq_pool_race_lost_total").increment(1);
                    TadqiqError::AlreadyMatched(id)
                }
                other => other,
            })?;

        counter!("tadqiq_pool_accepted_total").increment(1);
        tracing::info!(
            request_id = %request_id,
            expert_id = %expert_id,
            "request matched from pool"
        );

        let payload = serde_json::json!({
            "request_id": updated.id,
            "display_id": updated.display_id,
            "expert_id": expert_id,
        });
        if let Err(e) = self
            .notifier
            .emit(updated.client_id, EventKind::RequestMatched, payload)
            .await
        {
            tracing::warn!(error = %e, "matched notification failed");
        }

        Ok(updated)
    }

    /// Pass on a targeted invite. The request stays in the pool for everyone
    /// else.
    #[tracing::instrument(skip(self), fields(request_id = %request_id, expert_id = %actor.user_id))]
    pub async fn decline(&self, request_id: RequestId, actor: Actor) -> Result<PoolInvite> {
        let expert_id = self.require_approved_expert(&actor).await?;
        self.ledger
            .set_invite_status(
                request_id,
                expert_id,
                InviteStatus::Invited,
                InviteStatus::Declined,
            )
            .await
    }

    /// Admin-only: target one expert with an invitation to one request.
    #[tracing::instrument(skip(self), fields(request_id = %request_id, expert_id = %expert_id))]
    pub async fn invite(
        &self,
        request_id: RequestId,
        expert_id: UserId,
        actor: Actor,
    ) -> Result<PoolInvite> {
        if !actor.is_admin() {
            return Err(TadqiqError::Forbidden("only admins may invite".into()));
        }

        let expert = self.ledger.get_user(expert_id).await?;
        if !expert.as_expert().map(|e| e.approved).unwrap_or(false) {
            return Err(TadqiqError::Validation(format!(
                "user {expert_id} is not an approved expert"
            )));
        }

        let request = self.ledger.get_request(request_id).await?;
        if request.status != RequestStatus::PendingAssignment {
            return Err(TadqiqError::InvalidTransition {
                request: request_id,
                from: request.status,
                edge: "invite",
            });
        }

        let invite = self.ledger.create_invite(request_id, expert_id).await?;

        let payload = serde_json::json!({
            "request_id": request.id,
            "display_id": request.display_id,
        });
        if let Err(e) = self
            .notifier
            .emit(expert_id, EventKind::InviteReceived, payload)
            .await
        {
            tracing::warn!(error = %e, "invite notification failed");
        }

        Ok(invite)
    }
}
