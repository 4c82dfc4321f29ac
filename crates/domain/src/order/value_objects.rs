//! Value objects for the order domain.

use serde::{Deserialize, Serialize};

use crate::delivery::DeliveryType;
use crate::value_objects::Money;

use super::OrderError;

/// Product identifier (SKU).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One line of an order. Fixed once the order is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLineItem {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }

    /// `None` when quantity × unit price overflows.
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_multiply(self.quantity)
    }
}

/// Monetary totals computed once at creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub shipping_fee: Money,
    pub tax: Money,
    pub total: Money,
}

/// Tax configuration applied when totals are computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PricingPolicy {
    /// Tax rate in basis points (825 = 8.25%), applied to the subtotal.
    pub tax_rate_bps: u32,
}

impl PricingPolicy {
    pub fn with_tax_rate_bps(tax_rate_bps: u32) -> Self {
        Self { tax_rate_bps }
    }

    pub fn totals(
        &self,
        items: &[OrderLineItem],
        delivery_type: DeliveryType,
    ) -> Result<OrderTotals, OrderError> {
        let subtotal = items.iter().try_fold(Money::zero(), |acc, item| {
            item.line_total().and_then(|line| acc.checked_add(line))
        });
        let subtotal = subtotal.ok_or(OrderError::AmountOverflow)?;
        let shipping_fee = delivery_type.shipping_fee();
        let tax = subtotal
            .basis_points(self.tax_rate_bps)
            .ok_or(OrderError::AmountOverflow)?;
        let total = subtotal
            .checked_add(shipping_fee)
            .and_then(|sum| sum.checked_add(tax))
            .ok_or(OrderError::AmountOverflow)?;
        Ok(OrderTotals {
            subtotal,
            shipping_fee,
            tax,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_add_shipping_and_tax() {
        let items = [
            OrderLineItem::new("SKU-1", 2, Money::from_cents(1_250)),
            OrderLineItem::new("SKU-2", 1, Money::from_cents(499)),
        ];
        let totals = PricingPolicy::with_tax_rate_bps(1_000)
            .totals(&items, DeliveryType::Standard)
            .unwrap();

        assert_eq!(totals.subtotal.cents(), 2_999);
        assert_eq!(totals.tax.cents(), 300);
        assert_eq!(totals.shipping_fee, DeliveryType::Standard.shipping_fee());
        assert_eq!(
            totals.total,
            totals.subtotal + totals.shipping_fee + totals.tax
        );
    }

    #[test]
    fn default_policy_is_tax_free() {
        let items = [OrderLineItem::new("SKU-1", 3, Money::from_cents(100))];
        let totals = PricingPolicy::default()
            .totals(&items, DeliveryType::Express)
            .unwrap();
        assert!(totals.tax.is_zero());
    }

    #[test]
    fn totals_overflow_is_an_error() {
        let huge = [OrderLineItem::new("SKU-1", 3, Money::from_cents(i64::MAX / 2))];
        assert!(matches!(
            PricingPolicy::default().totals(&huge, DeliveryType::Standard),
            Err(OrderError::AmountOverflow)
        ));

        // each line fits, the sum does not
        let pair = [
            OrderLineItem::new("SKU-1", 1, Money::from_cents(i64::MAX - 10)),
            OrderLineItem::new("SKU-2", 1, Money::from_cents(20)),
        ];
        assert!(matches!(
            PricingPolicy::default().totals(&pair, DeliveryType::Standard),
            Err(OrderError::AmountOverflow)
        ));

        // subtotal fits but shipping pushes it over
        let edge = [OrderLineItem::new("SKU-1", 1, Money::from_cents(i64::MAX))];
        assert!(matches!(
            PricingPolicy::default().totals(&edge, DeliveryType::Express),
            Err(OrderError::AmountOverflow)
        ));
    }
}
