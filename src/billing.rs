//! Financial aggregator: spend figures and invoice views.
//!
//! Everything here is derived from the ledger's current state on every call.
//! A spend figure shown to an end user is never served from a cache, and a
//! display-side VAT breakdown never touches the stored invoice amount.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{Actor, Invoice, InvoiceId, InvoiceStatus, Role, UserId};
use crate::error::{Result, TadqiqError};
use crate::ledger::{InvoiceFilter, Ledger, RequestFilter};
use crate::money::VatCalculator;

/// An invoice joined with display-only derived fields.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView {
    #[serde(flatten)]
    pub invoice: Invoice,
    /// Human-readable description resolved from the originating request:
    /// plan name, else service name, else free-text description.
    pub description: String,
    /// Back-calculated VAT portion of the stored amount, for display.
    pub vat_amount: Decimal,
}

/// Optional scoping for invoice listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvoiceQuery {
    /// Admins may scope to one client; ignored for client callers, who are
    /// always scoped to themselves.
    pub client_id: Option<UserId>,
}

/// Computes per-client spend and invoice views from committed ledger state.
pub struct FinancialAggregator {
    ledger: Arc<dyn Ledger>,
    vat: VatCalculator,
}

impl FinancialAggregator {
    pub fn new(ledger: Arc<dyn Ledger>, vat: VatCalculator) -> Self {
        Self { ledger, vat }
    }

    /// Total VAT-inclusive spend for a client: the sum of base amounts over
    /// every request that is neither unpaid nor cancelled, made inclusive.
    ///
    /// Clients may ask about themselves; admins about anyone.
    #[tracing::instrument(skip(self), fields(client_id = %client_id))]
    pub async fn client_spend(&self, actor: Actor, client_id: UserId) -> Result<Decimal> {
        match actor.role {
            Role::Admin => {}
            Role::Client if actor.user_id == client_id => {}
            _ => {
                return Err(TadqiqError::Forbidden(
                    "spend figures are visible to the client and admins only".into(),
                ))
            }
        }

        let requests = self
            .ledger
            .query_requests(RequestFilter {
                client_id: Some(client_id),
                ..RequestFilter::default()
            })
            .await?;

        let base_total = requests
            .iter()
            .filter(|r| r.status.counts_toward_spend())
            .fold(Decimal::ZERO, |acc, r| acc + r.base_amount);

        Ok(self.vat.to_inclusive(base_total))
    }

    /// Invoices visible to this actor, newest first, joined with their
    /// description and display VAT component.
    ///
    /// Clients see only their own; admins see all (optionally scoped);
    /// experts are not a billing party and are refused.
    #[tracing::instrument(skip(self), fields(role = %actor.role))]
    pub async fn list_invoices(&self, actor: Actor, query: InvoiceQuery) -> Result<Vec<InvoiceView>> {
        let filter = match actor.role {
            Role::Client => InvoiceFilter {
                client_id: Some(actor.user_id),
            },
            Role::Admin => InvoiceFilter {
                client_id: query.client_id,
            },
            Role::Expert => {
                return Err(TadqiqError::Forbidden(
                    "experts may not list invoices".into(),
                ))
            }
        };

        let invoices = self.ledger.query_invoices(filter).await?;

        let mut views = Vec::with_capacity(invoices.len());
        for invoice in invoices {
            let request = self.ledger.get_request(invoice.request_id).await?;
            let vat_amount = self.vat.vat_component(invoice.amount);
            views.push(InvoiceView {
                description: request.offering.label().to_string(),
                vat_amount,
                invoice,
            });
        }
        Ok(views)
    }

    /// Admin-only: record settlement of an issued invoice.
    #[tracing::instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn mark_paid(&self, actor: Actor, invoice_id: InvoiceId) -> Result<Invoice> {
        self.set_status(actor, invoice_id, InvoiceStatus::Paid).await
    }

    /// Admin-only: void an issued invoice.
    #[tracing::instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn void(&self, actor: Actor, invoice_id: InvoiceId) -> Result<Invoice> {
        self.set_status(actor, invoice_id, InvoiceStatus::Void).await
    }

    async fn set_status(
        &self,
        actor: Actor,
        invoice_id: InvoiceId,
        to: InvoiceStatus,
    ) -> Result<Invoice> {
        if !actor.is_admin() {
            return Err(TadqiqError::Forbidden(
                "only admins may change invoice status".into(),
            ));
        }
        // Issued is the only state invoices may leave.
        let invoice = self
            .ledger
            .set_invoice_status(invoice_id, InvoiceStatus::Issued, to)
            .await?;
        tracing::info!(
            invoice_id = %invoice_id,
            status = %invoice.status,
            "invoice status updated"
        );
        Ok(invoice)
    }
}
