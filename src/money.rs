//! VAT-inclusive pricing arithmetic.
//!
//! All monetary figures in the engine are `rust_decimal::Decimal`: invoice
//! amounts are derived from a VAT-exclusive base exactly once, at issue time,
//! and re-deriving a display figure from a stored amount must never drift by
//! a cent no matter how often it is recomputed. Binary floats are banned from
//! every money path for that reason.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Statutory VAT rate for the jurisdiction (15%).
///
/// Changing this constant (or overriding the rate in [`crate::EngineConfig`])
/// only affects invoices issued afterwards; persisted invoice amounts are
/// immutable.
pub const DEFAULT_VAT_RATE: Decimal = dec!(0.15);

/// Pure VAT arithmetic over a fixed rate.
///
/// Both directions round to cents with half-up (midpoint-away-from-zero)
/// rounding. The calculator is total for non-negative finite input; negative
/// amounts are rejected upstream by validation before any money math runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VatCalculator {
    rate: Decimal,
}

impl VatCalculator {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }

    /// The rate this calculator was constructed with.
    pub fn rate(&self) -> Decimal {
        self.rate
    }

    /// Convert a VAT-exclusive base amount into the tax-inclusive total:
    /// `round(base * (1 + rate), 2)`.
    pub fn to_inclusive(&self, base: Decimal) -> Decimal {
        (base * (Decimal::ONE + self.rate))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Back-calculate the VAT-exclusive portion of an inclusive total.
    ///
    /// Display-only: the authoritative base amount is always the one stored
    /// on the request.
    pub fn exclusive_from_inclusive(&self, total: Decimal) -> Decimal {
        (total / (Decimal::ONE + self.rate))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    /// The VAT portion of an inclusive total, for display next to invoices.
    ///
    /// Idempotent: recomputing from the same stored total always yields the
    /// same value, it never accumulates.
    pub fn vat_component(&self, total: Decimal) -> Decimal {
        total - self.exclusive_from_inclusive(total)
    }
}

impl Default for VatCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_VAT_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_500_becomes_575_inclusive() {
        let vat = VatCalculator::default();
        assert_eq!(vat.to_inclusive(dec!(500.00)), dec!(575.00));
        assert_eq!(vat.vat_component(dec!(575.00)), dec!(75.00));
    }

    #[test]
    fn rounds_half_up_to_cents() {
        let vat = VatCalculator::default();
        // 33.33 * 1.15 = 38.3295 -> 38.33
        assert_eq!(vat.to_inclusive(dec!(33.33)), dec!(38.33));
        // 0.10 * 1.15 = 0.115, the midpoint case: away-from-zero gives 0.12
        assert_eq!(vat.to_inclusive(dec!(0.10)), dec!(0.12));
    }

    #[test]
    fn zero_base_is_zero_total() {
        let vat = VatCalculator::default();
        assert_eq!(vat.to_inclusive(Decimal::ZERO), dec!(0.00));
    }

    #[test]
    fn back_calculation_is_idempotent() {
        let vat = VatCalculator::default();
        let total = dec!(575.00);
        let once = vat.vat_component(total);
        let twice = vat.vat_component(total);
        assert_eq!(once, twice);
        // and the stored total is untouched by display math
        assert_eq!(total, dec!(575.00));
    }

    #[test]
    fn derivation_is_stable_under_redisplay_cycles() {
        let vat = VatCalculator::default();
        let total = vat.to_inclusive(dec!(1234.56));
        for _ in 0..10 {
            assert_eq!(vat.vat_component(total), vat.vat_component(total));
            assert_eq!(
                vat.exclusive_from_inclusive(total),
                vat.exclusive_from_inclusive(total)
            );
        }
    }
}
