//! Invoices: immutable financial snapshots of billable transitions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::request::RequestId;
use super::user::UserId;

/// Unique identifier for an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub Uuid);

impl std::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl From<Uuid> for InvoiceId {
    fn from(uuid: Uuid) -> Self {
        InvoiceId(uuid)
    }
}

impl std::ops::Deref for InvoiceId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Settlement status of an invoice. The only mutable field on an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Issued,
    Paid,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Void => "void",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "issued" => InvoiceStatus::Issued,
            "paid" => InvoiceStatus::Paid,
            "void" => InvoiceStatus::Void,
            _ => return None,
        })
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable financial snapshot tied to one billable transition.
///
/// `amount` is VAT-inclusive, computed from the request's base amount with
/// the rate in force at issue time. A later rate change never retroactively
/// alters a persisted invoice; only `status` is ever mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    /// Human-readable identifier, e.g. "INV-000017". Assigned by the ledger.
    pub display_id: String,
    pub request_id: RequestId,
    pub client_id: UserId,
    /// VAT-inclusive total, frozen at issue time.
    pub amount: Decimal,
    /// Three-letter currency code, e.g. "SAR".
    pub currency: String,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
}
