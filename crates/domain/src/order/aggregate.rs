//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AggregateId, CustomerId};
use event_store::Version;

use crate::aggregate::Aggregate;
use crate::delivery::DeliveryType;
use crate::value_objects::{Address, Money};

use super::{
    CreateOrder, OrderError, OrderEvent, OrderLineItem, OrderStatus, OrderTotals, PricingPolicy,
    events::OrderCreatedData,
};

/// When each status was entered. Each is set at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderTimeline {
    pub ordered_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

/// Order aggregate root.
#[derive(Debug, Clone, Default)]
pub struct Order {
    id: Option<AggregateId>,
    version: Version,
    customer_id: Option<CustomerId>,
    status: OrderStatus,
    items: Vec<OrderLineItem>,
    totals: OrderTotals,
    shipping_address: Option<Address>,
    delivery_type: DeliveryType,
    payment_ref: Option<String>,
    tracking_ref: Option<String>,
    cancellation_reason: Option<String>,
    timeline: OrderTimeline,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn order_id(&self) -> Option<AggregateId> {
        self.id
    }

    fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::OrderCreated(data) => self.apply_created(data),
            OrderEvent::OrderConfirmed(data) => {
                self.status = OrderStatus::Confirmed;
                self.timeline.confirmed_at = Some(data.confirmed_at);
            }
            OrderEvent::OrderConfirmedForFulfillment(data) => {
                self.status = OrderStatus::Paid;
                self.payment_ref = Some(data.payment_ref);
                self.timeline.paid_at = Some(data.paid_at);
            }
            OrderEvent::OrderShipped(data) => {
                self.status = OrderStatus::Shipped;
                self.tracking_ref = Some(data.tracking_ref);
                self.timeline.shipped_at = Some(data.shipped_at);
            }
            OrderEvent::OrderDelivered(data) => {
                self.status = OrderStatus::Delivered;
                self.timeline.delivered_at = Some(data.delivered_at);
            }
            OrderEvent::OrderCancelled(data) => {
                self.status = OrderStatus::Cancelled;
                self.cancellation_reason = Some(data.reason);
                self.timeline.cancelled_at = Some(data.cancelled_at);
            }
            OrderEvent::OrderRefunded(data) => {
                self.status = OrderStatus::Refunded;
                self.timeline.refunded_at = Some(data.refunded_at);
            }
        }
    }
}

// Query methods
impl Order {
    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderLineItem] {
        &self.items
    }

    pub fn totals(&self) -> &OrderTotals {
        &self.totals
    }

    /// Amount to capture for this order.
    pub fn total_amount(&self) -> Money {
        self.totals.total
    }

    pub fn shipping_address(&self) -> Option<&Address> {
        self.shipping_address.as_ref()
    }

    pub fn delivery_type(&self) -> DeliveryType {
        self.delivery_type
    }

    pub fn payment_ref(&self) -> Option<&str> {
        self.payment_ref.as_deref()
    }

    pub fn tracking_ref(&self) -> Option<&str> {
        self.tracking_ref.as_deref()
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn timeline(&self) -> &OrderTimeline {
        &self.timeline
    }
}

// Command methods (return events)
impl Order {
    pub fn create(
        &self,
        cmd: &CreateOrder,
        pricing: &PricingPolicy,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyCreated);
        }
        if cmd.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for item in &cmd.items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id.to_string(),
                });
            }
            if !item.unit_price.is_positive() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id.to_string(),
                    price: item.unit_price,
                });
            }
        }
        if let Some(field) = cmd.shipping_address.missing_field() {
            return Err(OrderError::IncompleteAddress { field });
        }
        let totals = pricing.totals(&cmd.items, cmd.delivery_type)?;

        Ok(vec![OrderEvent::OrderCreated(OrderCreatedData {
            order_id: cmd.order_id,
            customer_id: cmd.customer_id,
            items: cmd.items.clone(),
            totals,
            shipping_address: cmd.shipping_address.clone(),
            delivery_type: cmd.delivery_type,
            ordered_at: Utc::now(),
        })])
    }

    pub fn confirm(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_transition(OrderStatus::Confirmed)?;
        Ok(vec![OrderEvent::order_confirmed(self.require_id()?)])
    }

    /// Records the captured payment. Repeating it with the recorded
    /// reference is a no-op.
    pub fn mark_paid(&self, payment_ref: &str) -> Result<Vec<OrderEvent>, OrderError> {
        if payment_ref.trim().is_empty() {
            return Err(OrderError::MissingReference("payment_ref"));
        }
        if let Some(recorded) = &self.payment_ref {
            if recorded == payment_ref {
                return Ok(vec![]);
            }
            return Err(OrderError::AlreadyPaid {
                payment_ref: recorded.clone(),
            });
        }

        self.ensure_transition(OrderStatus::Paid)?;
        Ok(vec![OrderEvent::order_paid(
            self.require_id()?,
            payment_ref.to_string(),
            self.totals.total,
        )])
    }

    pub fn ship(&self, tracking_ref: &str) -> Result<Vec<OrderEvent>, OrderError> {
        if tracking_ref.trim().is_empty() {
            return Err(OrderError::MissingReference("tracking_ref"));
        }
        self.ensure_transition(OrderStatus::Shipped)?;
        Ok(vec![OrderEvent::order_shipped(
            self.require_id()?,
            tracking_ref.to_string(),
        )])
    }

    pub fn deliver(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_transition(OrderStatus::Delivered)?;
        Ok(vec![OrderEvent::order_delivered(self.require_id()?)])
    }

    pub fn cancel(&self, reason: &str) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_transition(OrderStatus::Cancelled)?;
        Ok(vec![OrderEvent::order_cancelled(
            self.require_id()?,
            reason,
            self.status,
        )])
    }

    pub fn refund(&self, reason: &str) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_transition(OrderStatus::Refunded)?;
        Ok(vec![OrderEvent::order_refunded(
            self.require_id()?,
            reason,
            self.totals.total,
        )])
    }

    fn ensure_transition(&self, to: OrderStatus) -> Result<(), OrderError> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(OrderError::InvalidState {
                from: self.status,
                to,
            })
        }
    }

    fn require_id(&self) -> Result<AggregateId, OrderError> {
        self.id.ok_or(OrderError::NotCreated)
    }
}

impl Order {
    fn apply_created(&mut self, data: OrderCreatedData) {
        self.id = Some(data.order_id);
        self.customer_id = Some(data.customer_id);
        self.status = OrderStatus::Pending;
        self.items = data.items;
        self.totals = data.totals;
        self.shipping_address = Some(data.shipping_address);
        self.delivery_type = data.delivery_type;
        self.timeline.ordered_at = Some(data.ordered_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn create_cmd() -> CreateOrder {
        CreateOrder::new(
            CustomerId::new(),
            vec![OrderLineItem::new("SKU-1", 2, Money::from_cents(1_000))],
            Address::new("1 Main St", "Springfield", "12345", "US"),
            DeliveryType::Standard,
        )
    }

    fn order_in(status: OrderStatus) -> Order {
        let mut order = Order::default();
        let events = order.create(&create_cmd(), &PricingPolicy::default()).unwrap();
        order.apply_events(events);

        let path: &[OrderStatus] = match status {
            OrderStatus::Pending => &[],
            OrderStatus::Confirmed => &[OrderStatus::Confirmed],
            OrderStatus::Paid => &[OrderStatus::Confirmed, OrderStatus::Paid],
            OrderStatus::Shipped => &[OrderStatus::Confirmed, OrderStatus::Paid, OrderStatus::Shipped],
            OrderStatus::Delivered => &[
                OrderStatus::Confirmed,
                OrderStatus::Paid,
                OrderStatus::Shipped,
                OrderStatus::Delivered,
            ],
            OrderStatus::Cancelled => &[OrderStatus::Cancelled],
            OrderStatus::Refunded => &[OrderStatus::Confirmed, OrderStatus::Paid, OrderStatus::Refunded],
        };
        for step in path {
            let events = match step {
                OrderStatus::Confirmed => order.confirm(),
                OrderStatus::Paid => order.mark_paid("tx-1"),
                OrderStatus::Shipped => order.ship("TRK-1"),
                OrderStatus::Delivered => order.deliver(),
                OrderStatus::Cancelled => order.cancel("test"),
                OrderStatus::Refunded => order.refund("test"),
                OrderStatus::Pending => unreachable!(),
            }
            .unwrap();
            order.apply_events(events);
        }
        assert_eq!(order.status(), status);
        order
    }

    #[test]
    fn create_computes_totals_once() {
        let mut order = Order::default();
        let events = order
            .create(&create_cmd(), &PricingPolicy::with_tax_rate_bps(500))
            .unwrap();
        order.apply_events(events);

        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.totals().subtotal.cents(), 2_000);
        assert_eq!(order.totals().tax.cents(), 100);
        assert!(order.timeline().ordered_at.is_some());
    }

    #[test]
    fn create_rejects_bad_lines() {
        let order = Order::default();
        let mut cmd = create_cmd();
        cmd.items[0].quantity = 0;
        assert!(matches!(
            order.create(&cmd, &PricingPolicy::default()),
            Err(OrderError::InvalidQuantity { .. })
        ));

        cmd.items.clear();
        assert!(matches!(
            order.create(&cmd, &PricingPolicy::default()),
            Err(OrderError::NoItems)
        ));
    }

    #[test]
    fn create_rejects_totals_that_overflow() {
        let order = Order::default();
        let mut cmd = create_cmd();
        cmd.items[0].quantity = 3;
        cmd.items[0].unit_price = Money::from_cents(i64::MAX / 2);

        let err = order.create(&cmd, &PricingPolicy::default()).unwrap_err();
        assert!(matches!(err, OrderError::AmountOverflow));
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
    }

    #[test]
    fn create_twice_is_rejected() {
        let order = order_in(OrderStatus::Pending);
        assert!(matches!(
            order.create(&create_cmd(), &PricingPolicy::default()),
            Err(OrderError::AlreadyCreated)
        ));
    }

    #[test]
    fn mark_paid_requires_confirmation() {
        let order = order_in(OrderStatus::Pending);
        assert!(matches!(
            order.mark_paid("tx-1"),
            Err(OrderError::InvalidState {
                from: OrderStatus::Pending,
                to: OrderStatus::Paid
            })
        ));
    }

    #[test]
    fn mark_paid_same_ref_is_noop() {
        let order = order_in(OrderStatus::Paid);
        assert!(order.mark_paid("tx-1").unwrap().is_empty());
        assert!(matches!(
            order.mark_paid("tx-2"),
            Err(OrderError::AlreadyPaid { .. })
        ));

        let shipped = order_in(OrderStatus::Shipped);
        assert!(shipped.mark_paid("tx-1").unwrap().is_empty());
    }

    #[test]
    fn cannot_cancel_after_shipping() {
        for status in [OrderStatus::Shipped, OrderStatus::Delivered] {
            let order = order_in(status);
            assert!(matches!(
                order.cancel("late"),
                Err(OrderError::InvalidState { to: OrderStatus::Cancelled, .. })
            ));
        }
    }

    #[test]
    fn terminal_states_reject_further_moves() {
        let cancelled = order_in(OrderStatus::Cancelled);
        assert!(cancelled.confirm().is_err());
        assert!(cancelled.refund("x").is_err());
        assert_eq!(cancelled.cancellation_reason(), Some("test"));

        let refunded = order_in(OrderStatus::Refunded);
        assert!(refunded.ship("TRK").is_err());
        assert!(refunded.timeline().refunded_at.is_some());
    }

    #[test]
    fn delivered_order_can_be_refunded() {
        let order = order_in(OrderStatus::Delivered);
        let events = order.refund("returned").unwrap();
        assert!(matches!(&events[0], OrderEvent::OrderRefunded(d) if d.amount == order.total_amount()));
    }
}
