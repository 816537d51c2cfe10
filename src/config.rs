//! Engine policy configuration.

use rust_decimal::Decimal;

use crate::money::DEFAULT_VAT_RATE;

/// Policy knobs for the lifecycle engine and pool matcher.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// When true, newly submitted requests enter the pool directly at
    /// `PendingAssignment` (payment confirmed at creation time). When false,
    /// they start at `PendingPayment` and wait for an explicit confirmation.
    pub paid_on_creation: bool,

    /// When true, client approval routes through `ReviewAdmin` before
    /// completion. When false, client approval completes the request
    /// directly (and triggers billing).
    pub admin_review: bool,

    /// Wall-clock window after which an unanswered pool invite no longer
    /// grants visibility. Enforced lazily at read/accept time; nothing in
    /// the engine runs on a timer.
    pub invite_ttl_hours: i64,

    /// VAT rate applied to invoices issued from now on. Frozen into each
    /// invoice at issue time; changing it never touches persisted amounts.
    pub vat_rate: Decimal,

    /// Currency code for requests that do not specify one.
    pub currency: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            paid_on_creation: false,
            admin_review: true,
            invite_ttl_hours: 48,
            vat_rate: DEFAULT_VAT_RATE,
            currency: "SAR".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn invite_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.invite_ttl_hours)
    }
}
