use crate::{
    config::PricingConfig,
    errors::InvalidCartError,
    models::{CartLine, CartSnapshot, PriceBreakdown},
};
use tracing::debug;

/// Shipping and redemption rules applied by [`CartAggregator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PricingPolicy {
    pub free_shipping_threshold: i64,
    pub shipping_fee: i64,
    pub max_redemption: i64,
    pub point_value: i64,
    pub max_line_quantity: i64,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self::from(&PricingConfig::default())
    }
}

impl From<&PricingConfig> for PricingPolicy {
    fn from(config: &PricingConfig) -> Self {
        Self {
            free_shipping_threshold: config.free_shipping_threshold,
            shipping_fee: config.shipping_fee,
            max_redemption: config.max_redemption,
            point_value: config.point_value,
            max_line_quantity: config.max_line_quantity,
        }
    }
}

/// Computes the price breakdown of a cart.
///
/// Pure: no I/O, and the same snapshot always yields the same breakdown.
/// Shipping is free once the subtotal reaches the threshold; the discount
/// comes from redeemed loyalty points and never exceeds the subtotal or the
/// redemption ceiling.
#[derive(Clone, Debug, Default)]
pub struct CartAggregator {
    policy: PricingPolicy,
}

impl CartAggregator {
    pub fn new(policy: PricingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PricingPolicy {
        &self.policy
    }

    pub fn compute(
        &self,
        cart: &CartSnapshot,
        redeemed_points: Option<i64>,
    ) -> Result<PriceBreakdown, InvalidCartError> {
        if cart.is_empty() {
            return Err(InvalidCartError::InvalidCart("cart is empty".to_string()));
        }

        let mut subtotal: i64 = 0;
        for (index, line) in cart.lines.iter().enumerate() {
            self.validate_line(index, line)?;
            subtotal = line
                .unit_price
                .checked_mul(line.quantity)
                .and_then(|amount| subtotal.checked_add(amount))
                .ok_or_else(|| {
                    InvalidCartError::InvalidCart("cart total is too large".to_string())
                })?;
        }

        let discount = self.discount_for(subtotal, redeemed_points.unwrap_or(0))?;
        let shipping_fee = if subtotal >= self.policy.free_shipping_threshold {
            0
        } else {
            self.policy.shipping_fee
        };
        let total = (subtotal - discount).max(0) + shipping_fee;

        debug!(subtotal, discount, shipping_fee, total, "Computed cart totals");

        Ok(PriceBreakdown {
            subtotal,
            discount,
            shipping_fee,
            total,
        })
    }

    fn validate_line(&self, index: usize, line: &CartLine) -> Result<(), InvalidCartError> {
        if line.product_id.trim().is_empty() {
            return Err(InvalidCartError::InvalidCart(format!(
                "line {} has no product id",
                index + 1
            )));
        }
        if line.quantity < 1 {
            return Err(InvalidCartError::InvalidCart(format!(
                "quantity for product {} must be at least 1",
                line.product_id
            )));
        }
        if line.quantity > self.policy.max_line_quantity {
            return Err(InvalidCartError::InvalidCart(format!(
                "quantity for product {} cannot exceed {}",
                line.product_id, self.policy.max_line_quantity
            )));
        }
        if line.unit_price < 0 {
            return Err(InvalidCartError::InvalidCart(format!(
                "price for product {} cannot be negative",
                line.product_id
            )));
        }
        Ok(())
    }

    fn discount_for(&self, subtotal: i64, points: i64) -> Result<i64, InvalidCartError> {
        if points < 0 {
            return Err(InvalidCartError::InvalidCart(
                "redeemed points cannot be negative".to_string(),
            ));
        }
        let value = points.saturating_mul(self.policy.point_value);
        Ok(value.min(subtotal).min(self.policy.max_redemption).max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CheckoutError;
    use assert_matches::assert_matches;
    use rstest::rstest;

    fn cart(lines: &[(i64, i64)]) -> CartSnapshot {
        lines
            .iter()
            .enumerate()
            .map(|(i, (price, qty))| CartLine::new(format!("p{}", i), *price, *qty))
            .collect()
    }

    #[test]
    fn below_threshold_pays_shipping() {
        let breakdown = CartAggregator::default()
            .compute(&cart(&[(150_000, 3)]), None)
            .unwrap();
        assert_eq!(breakdown.subtotal, 450_000);
        assert_eq!(breakdown.shipping_fee, 30_000);
        assert_eq!(breakdown.total, 480_000);
    }

    #[test]
    fn at_threshold_ships_free_and_applies_discount() {
        let breakdown = CartAggregator::default()
            .compute(&cart(&[(200_000, 2), (100_000, 2)]), Some(50_000))
            .unwrap();
        assert_eq!(breakdown.subtotal, 600_000);
        assert_eq!(breakdown.discount, 50_000);
        assert_eq!(breakdown.shipping_fee, 0);
        assert_eq!(breakdown.total, 550_000);
    }

    #[test]
    fn threshold_is_inclusive() {
        let breakdown = CartAggregator::default()
            .compute(&cart(&[(500_000, 1)]), None)
            .unwrap();
        assert_eq!(breakdown.shipping_fee, 0);
    }

    #[test]
    fn discount_is_capped_by_ceiling_and_subtotal() {
        let aggregator = CartAggregator::default();
        let capped = aggregator
            .compute(&cart(&[(600_000, 1)]), Some(250_000))
            .unwrap();
        assert_eq!(capped.discount, 100_000);

        let small = aggregator.compute(&cart(&[(40_000, 1)]), Some(90_000)).unwrap();
        assert_eq!(small.discount, 40_000);
        assert_eq!(small.total, 30_000);
    }

    #[rstest]
    #[case(0, 1_000)]
    #[case(-1, 1_000)]
    #[case(1_000, 1_000)]
    #[case(1, -5)]
    fn rejects_bad_lines(#[case] quantity: i64, #[case] price: i64) {
        let result = CartAggregator::default().compute(&cart(&[(price, quantity)]), None);
        assert_matches!(result, Err(CheckoutError::InvalidCart(_)));
    }

    #[test]
    fn rejects_empty_cart_and_negative_points() {
        let aggregator = CartAggregator::default();
        assert_matches!(
            aggregator.compute(&CartSnapshot::default(), None),
            Err(CheckoutError::InvalidCart(_))
        );
        assert_matches!(
            aggregator.compute(&cart(&[(10, 1)]), Some(-1)),
            Err(CheckoutError::InvalidCart(_))
        );
    }

    #[test]
    fn free_items_are_allowed() {
        let breakdown = CartAggregator::default()
            .compute(&cart(&[(0, 2)]), None)
            .unwrap();
        assert_eq!(breakdown.subtotal, 0);
        assert_eq!(breakdown.total, 30_000);
    }

    #[test]
    fn overflow_is_a_validation_error() {
        let result = CartAggregator::default().compute(&cart(&[(i64::MAX, 2)]), None);
        assert_matches!(result, Err(CheckoutError::InvalidCart(_)));
    }
}
