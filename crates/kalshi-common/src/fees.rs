//! Exchange fee schedule.

use rust_decimal::Decimal;

use crate::types::Cents;

/// Convex taker fee: `0.07 * qty * p * (1 - p)` dollars, rounded up to the
/// next cent, with `p = price / 100`.
///
/// The fee peaks at 50c and vanishes toward the tails, so cheap and
/// near-certain contracts trade almost free while coin-flips pay the most.
pub fn convex_fee(price: Cents, qty: u32) -> Decimal {
    let p = Decimal::from(price) / Decimal::ONE_HUNDRED;
    let raw = Decimal::new(7, 2) * Decimal::from(qty) * p * (Decimal::ONE - p);
    // Round up to the cent: ceil(raw * 100) / 100.
    (raw * Decimal::ONE_HUNDRED).ceil() / Decimal::ONE_HUNDRED
}

/// Per-contract fee estimate in cents, without the per-order rounding.
///
/// Used by strategies to gate on edge before a quantity is known; the
/// rounded fee for the actual order is re-checked afterwards.
pub fn fee_estimate_cents(price: Cents) -> Decimal {
    let p = Decimal::from(price) / Decimal::ONE_HUNDRED;
    Decimal::new(7, 2) * p * (Decimal::ONE - p) * Decimal::ONE_HUNDRED
}

/// Total cost in dollars of buying `qty` contracts at `price` cents,
/// including the convex fee.
pub fn cost_with_fee(price: Cents, qty: u32) -> Decimal {
    let notional = Decimal::from(qty) * Decimal::from(price) / Decimal::ONE_HUNDRED;
    notional + convex_fee(price, qty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_convex_fee_midpoint() {
        // p = 0.5: 0.07 * 10 * 0.25 = 0.175 -> ceil to 0.18
        assert_eq!(convex_fee(50, 10), dec!(0.18));
    }

    #[test]
    fn test_convex_fee_tails_cheaper() {
        let mid = convex_fee(50, 100);
        let tail = convex_fee(5, 100);
        assert!(tail < mid);
        // p = 0.05: 0.07 * 100 * 0.05 * 0.95 = 0.3325 -> 0.34
        assert_eq!(tail, dec!(0.34));
    }

    #[test]
    fn test_convex_fee_rounds_up() {
        // p = 0.4: 0.07 * 1 * 0.4 * 0.6 = 0.0168 -> 0.02
        assert_eq!(convex_fee(40, 1), dec!(0.02));
    }

    #[test]
    fn test_cost_with_fee() {
        // 10 @ 40c = $4.00 notional, fee 0.07*10*0.4*0.6 = 0.168 -> 0.17
        assert_eq!(cost_with_fee(40, 10), dec!(4.17));
    }

    #[test]
    fn test_fee_estimate_unrounded() {
        // Estimate carries sub-cent precision for edge gating.
        assert_eq!(fee_estimate_cents(50), dec!(1.75));
    }
}
