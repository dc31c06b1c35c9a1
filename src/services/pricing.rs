//! Price math for bookings and orders.
//!
//! Everything here is pure: no storage access, no clock. Amounts are
//! `rust_decimal::Decimal`; student-facing results are rounded half-up to the
//! currency's two minor digits at computation time, so persisted totals never
//! carry more precision than an invoice shows.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Minor-unit digits for student-facing amounts.
const PRICE_SCALE: u32 = 2;

/// One priced line of an order: a slot's base price and its optional
/// percentage reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLine {
    pub base_price: Decimal,
    pub reduction: Option<i32>,
}

/// Aggregated order amounts. `reduction` is exactly
/// `original - discounted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub original: Decimal,
    pub discounted: Decimal,
    pub reduction: Decimal,
}

impl OrderTotals {
    pub fn zero() -> Self {
        Self {
            original: Decimal::ZERO,
            discounted: Decimal::ZERO,
            reduction: Decimal::ZERO,
        }
    }
}

fn round_amount(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

fn validate_reduction(reduction: Option<i32>) -> Result<i32, ServiceError> {
    match reduction {
        None => Ok(0),
        Some(r) if (0..=100).contains(&r) => Ok(r),
        Some(r) => Err(ServiceError::Validation(format!(
            "reduction must be between 0 and 100, got {}",
            r
        ))),
    }
}

/// Discounted price of a single booking:
/// `base_price * (1 - reduction / 100)`, rounded half-up to two digits.
pub fn booking_price(base_price: Decimal, reduction: Option<i32>) -> Result<Decimal, ServiceError> {
    if base_price.is_sign_negative() {
        return Err(ServiceError::Validation(format!(
            "price must not be negative, got {}",
            base_price
        )));
    }
    let reduction = validate_reduction(reduction)?;

    let factor = (Decimal::ONE_HUNDRED - Decimal::from(reduction)) / Decimal::ONE_HUNDRED;
    Ok(round_amount(base_price * factor))
}

/// Sums per-line base and discounted prices into order totals.
pub fn order_totals<I>(lines: I) -> Result<OrderTotals, ServiceError>
where
    I: IntoIterator<Item = PriceLine>,
{
    let mut original = Decimal::ZERO;
    let mut discounted = Decimal::ZERO;

    for line in lines {
        original += round_amount(line.base_price);
        discounted += booking_price(line.base_price, line.reduction)?;
    }

    Ok(OrderTotals {
        original,
        discounted,
        reduction: original - discounted,
    })
}

/// Tax-inclusive amount. Tax is applied at invoice time only, never stored
/// per booking.
pub fn apply_tax(amount: Decimal, tax_percent: Decimal) -> Decimal {
    round_amount(amount * (Decimal::ONE_HUNDRED + tax_percent) / Decimal::ONE_HUNDRED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(dec!(100.00), Some(10), dec!(90.00))]
    #[case(dec!(100.00), None, dec!(100.00))]
    #[case(dec!(100.00), Some(0), dec!(100.00))]
    #[case(dec!(100.00), Some(100), dec!(0.00))]
    #[case(dec!(50.00), Some(33), dec!(33.50))]
    #[case(dec!(0.00), Some(50), dec!(0.00))]
    fn booking_price_cases(
        #[case] base: Decimal,
        #[case] reduction: Option<i32>,
        #[case] expected: Decimal,
    ) {
        assert_eq!(booking_price(base, reduction).unwrap(), expected);
    }

    #[test]
    fn booking_price_rounds_half_up() {
        // 33.335 at the midpoint rounds away from zero, not to even
        assert_eq!(booking_price(dec!(66.67), Some(50)).unwrap(), dec!(33.34));
        assert_eq!(booking_price(dec!(0.25), Some(50)).unwrap(), dec!(0.13));
    }

    #[test]
    fn booking_price_rejects_bad_input() {
        assert!(matches!(
            booking_price(dec!(-1.00), None),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            booking_price(dec!(10.00), Some(101)),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            booking_price(dec!(10.00), Some(-5)),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn order_totals_sums_lines() {
        let totals = order_totals([
            PriceLine {
                base_price: dec!(100.00),
                reduction: Some(10),
            },
            PriceLine {
                base_price: dec!(50.00),
                reduction: None,
            },
        ])
        .unwrap();

        assert_eq!(totals.original, dec!(150.00));
        assert_eq!(totals.discounted, dec!(140.00));
        assert_eq!(totals.reduction, dec!(10.00));
    }

    #[test]
    fn order_totals_of_nothing_is_zero() {
        let totals = order_totals([]).unwrap();
        assert_eq!(totals, OrderTotals::zero());
    }

    #[test]
    fn apply_tax_is_invoice_only_math() {
        assert_eq!(apply_tax(dec!(100.00), dec!(20)), dec!(120.00));
        assert_eq!(apply_tax(dec!(90.00), dec!(8.5)), dec!(97.65));
        assert_eq!(apply_tax(dec!(100.00), Decimal::ZERO), dec!(100.00));
    }

    proptest! {
        #[test]
        fn totals_invariants(
            lines in prop::collection::vec((0u64..1_000_000, prop::option::of(0i32..=100)), 0..20)
        ) {
            let lines: Vec<PriceLine> = lines
                .into_iter()
                .map(|(cents, reduction)| PriceLine {
                    base_price: Decimal::new(cents as i64, 2),
                    reduction,
                })
                .collect();

            let totals = order_totals(lines).unwrap();

            prop_assert!(totals.discounted <= totals.original);
            prop_assert!(totals.reduction >= Decimal::ZERO);
            prop_assert_eq!(totals.reduction, totals.original - totals.discounted);
        }
    }
}
