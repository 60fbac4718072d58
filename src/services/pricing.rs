//! Order pricing. All money math is `Decimal`; rounding to two decimal
//! places happens exactly once, when the breakdown is built.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::errors::ServiceError;

/// Catalog price of a single 20L bottle.
pub const PRICE_PER_BOTTLE: Decimal = dec!(50.00);

/// Totals for an order line, both rounded half-up to 2 decimal places.
///
/// `final_total` is derived from the exact (unrounded) product, so the
/// two fields can differ from naively discounting the rounded original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceBreakdown {
    pub original_total: Decimal,
    pub final_total: Decimal,
}

impl PriceBreakdown {
    pub fn discount_amount(&self) -> Decimal {
        self.original_total - self.final_total
    }
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Prices `quantity` units at `unit_price` with a percentage discount.
///
/// Out-of-domain input is rejected, never clamped: quantity and unit
/// price must be positive and the discount must lie in `[0, 100]`.
pub fn price(
    quantity: i32,
    unit_price: Decimal,
    discount_percentage: i32,
) -> Result<PriceBreakdown, ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(
            "quantity must be positive".to_string(),
        ));
    }
    if unit_price <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "unit_price must be positive".to_string(),
        ));
    }
    if !(0..=100).contains(&discount_percentage) {
        return Err(ServiceError::ValidationError(
            "discount_percentage must be between 0 and 100".to_string(),
        ));
    }

    let original = Decimal::from(quantity) * unit_price;
    let rate = Decimal::ONE - Decimal::from(discount_percentage) / dec!(100);

    Ok(PriceBreakdown {
        original_total: round2(original),
        final_total: round2(original * rate),
    })
}

/// Prices an order at the current catalog price.
pub fn quote(quantity: i32, discount_percentage: i32) -> Result<PriceBreakdown, ServiceError> {
    price(quantity, PRICE_PER_BOTTLE, discount_percentage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test]
    fn three_bottles_at_twenty_percent() {
        let breakdown = quote(3, 20).unwrap();
        assert_eq!(breakdown.original_total, dec!(150.00));
        assert_eq!(breakdown.final_total, dec!(120.00));
        assert_eq!(breakdown.discount_amount(), dec!(30.00));
    }

    #[test_case(4, 15, dec!(200.00), dec!(170.00) ; "fifteen percent off four bottles")]
    #[test_case(7, 0, dec!(350.00), dec!(350.00) ; "zero discount leaves the total untouched")]
    #[test_case(2, 100, dec!(100.00), dec!(0.00) ; "full discount prices to zero")]
    #[test_case(1, 33, dec!(50.00), dec!(33.50) ; "odd percentages stay exact at two places")]
    fn discount_grid(quantity: i32, discount: i32, original: Decimal, final_total: Decimal) {
        let breakdown = quote(quantity, discount).unwrap();
        assert_eq!(breakdown.original_total, original);
        assert_eq!(breakdown.final_total, final_total);
    }

    #[test]
    fn final_total_rounds_the_exact_product_not_the_rounded_original() {
        // 3 x 0.335 = 1.005 -> original 1.01, but the 50% discount applies
        // to the exact 1.005: 0.5025 -> 0.50. Discounting the rounded 1.01
        // would have produced 0.51.
        let breakdown = price(3, dec!(0.335), 50).unwrap();
        assert_eq!(breakdown.original_total, dec!(1.01));
        assert_eq!(breakdown.final_total, dec!(0.50));
    }

    #[test]
    fn midpoints_round_away_from_zero() {
        let breakdown = price(1, dec!(12.345), 0).unwrap();
        assert_eq!(breakdown.original_total, dec!(12.35));
    }

    #[test]
    fn out_of_domain_input_is_rejected_not_clamped() {
        assert_matches!(quote(0, 10), Err(ServiceError::ValidationError(_)));
        assert_matches!(quote(-5, 10), Err(ServiceError::ValidationError(_)));
        assert_matches!(quote(1, -1), Err(ServiceError::ValidationError(_)));
        assert_matches!(quote(1, 101), Err(ServiceError::ValidationError(_)));
        assert_matches!(
            price(1, Decimal::ZERO, 10),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            price(1, dec!(-50.00), 10),
            Err(ServiceError::ValidationError(_))
        );
    }

    proptest! {
        #[test]
        fn discounted_total_matches_the_formula(
            quantity in 1i32..=500,
            unit_cents in 1i64..=20_000,
            discount in 0i32..=100,
        ) {
            let unit_price = Decimal::new(unit_cents, 2);
            let breakdown = price(quantity, unit_price, discount).unwrap();

            let exact = Decimal::from(quantity) * unit_price;
            let expected_final =
                round2(exact * (Decimal::ONE - Decimal::from(discount) / dec!(100)));

            prop_assert_eq!(breakdown.original_total, round2(exact));
            prop_assert_eq!(breakdown.final_total, expected_final);
            prop_assert!(breakdown.final_total <= breakdown.original_total);
            prop_assert!(breakdown.discount_amount() >= Decimal::ZERO);
        }
    }
}
