//! In-memory ledger.
//!
//! Backs tests and embedded callers. A single `tokio::sync::RwLock` over the
//! whole store makes every commit trivially atomic: a write guard spans the
//! precondition check and all effect writes, which is exactly the contract
//! the postgres backend provides with a transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    Invoice, InvoiceId, InvoiceStatus, InviteStatus, NewRequest, PoolInvite, Request, RequestId,
    RequestStatus, User, UserId,
};
use crate::error::{Result, TadqiqError};

use super::{
    now, InvoiceFilter, InviteResolution, Ledger, RequestFilter, TransitionEffects,
};

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, User>,
    requests: HashMap<RequestId, Request>,
    invites: HashMap<(RequestId, UserId), PoolInvite>,
    invoices: HashMap<InvoiceId, Invoice>,
    request_seq: u64,
    invoice_seq: u64,
}

/// Ledger backed by process memory.
#[derive(Default)]
pub struct MemoryLedger {
    inner: RwLock<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn create_user(&self, user: User) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.users.insert(user.id, user);
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<User> {
        let inner = self.inner.read().await;
        inner
            .users
            .get(&id)
            .cloned()
            .ok_or(TadqiqError::UserNotFound(id))
    }

    async fn create_request(&self, new: NewRequest, status: RequestStatus) -> Result<Request> {
        let currency = new
            .currency
            .ok_or_else(|| TadqiqError::Validation("currency must be set".into()))?;
        let mut inner = self.inner.write().await;
        inner.request_seq += 1;
        let created_at = now();
        let request = Request {
            id: RequestId(Uuid::new_v4()),
            display_id: format!("REQ-{:06}", inner.request_seq),
            client_id: new.client_id,
            expert_id: None,
            offering: new.offering,
            base_amount: new.base_amount,
            currency,
            status,
            created_at,
            last_transition_at: created_at,
        };
        inner.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_request(&self, id: RequestId) -> Result<Request> {
        let inner = self.inner.read().await;
        inner
            .requests
            .get(&id)
            .cloned()
            .ok_or(TadqiqError::RequestNotFound(id))
    }

    async fn query_requests(&self, filter: RequestFilter) -> Result<Vec<Request>> {
        let inner = self.inner.read().await;
        Ok(inner
            .requests
            .values()
            .filter(|r| filter.client_id.is_none_or(|c| r.client_id == c))
            .filter(|r| filter.expert_id.is_none_or(|e| r.expert_id == Some(e)))
            .filter(|r| filter.status.is_none_or(|s| r.status == s))
            .cloned()
            .collect())
    }

    async fn commit_transition(
        &self,
        id: RequestId,
        expected: RequestStatus,
        effects: TransitionEffects,
    ) -> Result<Request> {
        let mut inner = self.inner.write().await;

        // Precondition check and all effect writes happen under one write
        // guard; concurrent committers serialize here.
        {
            let request = inner
                .requests
                .get(&id)
                .ok_or(TadqiqError::RequestNotFound(id))?;
            if request.status != expected {
                return Err(TadqiqError::PreconditionFailed(id));
            }
        }

        if let Some(resolution) = &effects.resolve_invites {
            let winner = match resolution {
                InviteResolution::AcceptFor(expert) => Some(*expert),
                InviteResolution::ExpireAll => None,
            };
            for invite in inner.invites.values_mut() {
                if invite.request_id != id || invite.status != InviteStatus::Invited {
                    continue;
                }
                invite.status = if Some(invite.expert_id) == winner {
                    InviteStatus::Accepted
                } else {
                    InviteStatus::Expired
                };
            }
        }

        let transition_at = now();

        if let Some(draft) = &effects.issue_invoice {
            let request = &inner.requests[&id];
            let already_invoiced = inner.invoices.values().any(|i| i.request_id == id);
            if already_invoiced {
                // Single-invoice policy: a request bills at most once.
                tracing::warn!(request_id = %id, "invoice already exists, skipping issue");
            } else {
                let invoice = Invoice {
                    id: InvoiceId(Uuid::new_v4()),
                    display_id: String::new(), // assigned below, after seq bump
                    request_id: id,
                    client_id: request.client_id,
                    amount: draft.amount,
                    currency: request.currency.clone(),
                    status: InvoiceStatus::Issued,
                    created_at: transition_at,
                };
                inner.invoice_seq += 1;
                let display_id = format!("INV-{:06}", inner.invoice_seq);
                inner.invoices.insert(
                    invoice.id,
                    Invoice {
                        display_id,
                        ..invoice
                    },
                );
            }
        }

        let request = inner
            .requests
            .get_mut(&id)
            .expect("checked above under the same guard");
        request.status = effects.new_status;
        if let Some(expert) = effects.assign_expert {
            request.expert_id = Some(expert);
        }
        if !request.status.requires_expert() {
            request.expert_id = None;
        }
        request.last_transition_at = transition_at;

        debug_assert!(
            request.assignment_invariant_holds(),
            "expert assignment invariant violated for {}",
            request.id
        );

        Ok(request.clone())
    }

    async fn create_invite(&self, request_id: RequestId, expert_id: UserId) -> Result<PoolInvite> {
        let mut inner = self.inner.write().await;
        if !inner.requests.contains_key(&request_id) {
            return Err(TadqiqError::RequestNotFound(request_id));
        }
        let key = (request_id, expert_id);
        if inner.invites.contains_key(&key) {
            return Err(TadqiqError::Validation(format!(
                "expert {expert_id} is already invited to request {request_id}"
            )));
        }
        let invite = PoolInvite {
            request_id,
            expert_id,
            status: InviteStatus::Invited,
            created_at: now(),
        };
        inner.invites.insert(key, invite.clone());
        Ok(invite)
    }

    async fn invites_for_request(&self, request_id: RequestId) -> Result<Vec<PoolInvite>> {
        let inner = self.inner.read().await;
        Ok(inner
            .invites
            .values()
            .filter(|i| i.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn invites_for_expert(&self, expert_id: UserId) -> Result<Vec<PoolInvite>> {
        let inner = self.inner.read().await;
        Ok(inner
            .invites
            .values()
            .filter(|i| i.expert_id == expert_id)
            .cloned()
            .collect())
    }

    async fn set_invite_status(
        &self,
        request_id: RequestId,
        expert_id: UserId,
        expected: InviteStatus,
        to: InviteStatus,
    ) -> Result<PoolInvite> {
        let mut inner = self.inner.write().await;
        let invite = inner
            .invites
            .get_mut(&(request_id, expert_id))
            .ok_or(TadqiqError::InviteNotFound {
                request: request_id,
                expert: expert_id,
            })?;
        if invite.status != expected {
            return Err(TadqiqError::PreconditionFailed(request_id));
        }
        invite.status = to;
        Ok(invite.clone())
    }

    async fn get_invoice(&self, id: InvoiceId) -> Result<Invoice> {
        let inner = self.inner.read().await;
        inner
            .invoices
            .get(&id)
            .cloned()
            .ok_or(TadqiqError::InvoiceNotFound(id))
    }

    async fn query_invoices(&self, filter: InvoiceFilter) -> Result<Vec<Invoice>> {
        let inner = self.inner.read().await;
        let mut invoices: Vec<Invoice> = inner
            .invoices
            .values()
            .filter(|i| filter.client_id.is_none_or(|c| i.client_id == c))
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invoices)
    }

    async fn set_invoice_status(
        &self,
        id: InvoiceId,
        expected: InvoiceStatus,
        to: InvoiceStatus,
    ) -> Result<Invoice> {
        let mut inner = self.inner.write().await;
        let invoice = inner
            .invoices
            .get_mut(&id)
            .ok_or(TadqiqError::InvoiceNotFound(id))?;
        if invoice.status != expected {
            return Err(TadqiqError::InvalidInvoiceTransition {
                invoice: id,
                from: invoice.status,
                edge: edge_name(to),
            });
        }
        invoice.status = to;
        Ok(invoice.clone())
    }
}

fn edge_name(to: InvoiceStatus) -> &'static str {
    match to {
        InvoiceStatus::Paid => "mark paid",
        InvoiceStatus::Void => "void",
        InvoiceStatus::Issued => "reissue",
    }
}
