//! Order domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, CustomerId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::delivery::DeliveryType;
use crate::value_objects::{Address, Money};

use super::{OrderLineItem, OrderStatus, OrderTotals};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    OrderCreated(OrderCreatedData),
    OrderConfirmed(OrderConfirmedData),
    /// Payment captured; the order is PAID and ready for delivery.
    OrderConfirmedForFulfillment(OrderPaidData),
    OrderShipped(OrderShippedData),
    OrderDelivered(OrderDeliveredData),
    OrderCancelled(OrderCancelledData),
    OrderRefunded(OrderRefundedData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "OrderCreated",
            OrderEvent::OrderConfirmed(_) => "OrderConfirmed",
            OrderEvent::OrderConfirmedForFulfillment(_) => "OrderConfirmedForFulfillment",
            OrderEvent::OrderShipped(_) => "OrderShipped",
            OrderEvent::OrderDelivered(_) => "OrderDelivered",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
            OrderEvent::OrderRefunded(_) => "OrderRefunded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub items: Vec<OrderLineItem>,
    pub totals: OrderTotals,
    pub shipping_address: Address,
    pub delivery_type: DeliveryType,
    pub ordered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfirmedData {
    pub order_id: AggregateId,
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPaidData {
    pub order_id: AggregateId,
    /// The successful payment transaction.
    pub payment_ref: String,
    pub amount: Money,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderShippedData {
    pub order_id: AggregateId,
    pub tracking_ref: String,
    pub shipped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDeliveredData {
    pub order_id: AggregateId,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub order_id: AggregateId,
    pub reason: String,
    /// Status the order was cancelled from.
    pub previous_status: OrderStatus,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRefundedData {
    pub order_id: AggregateId,
    pub reason: String,
    pub amount: Money,
    pub refunded_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn order_confirmed(order_id: AggregateId) -> Self {
        OrderEvent::OrderConfirmed(OrderConfirmedData {
            order_id,
            confirmed_at: Utc::now(),
        })
    }

    pub fn order_paid(order_id: AggregateId, payment_ref: String, amount: Money) -> Self {
        OrderEvent::OrderConfirmedForFulfillment(OrderPaidData {
            order_id,
            payment_ref,
            amount,
            paid_at: Utc::now(),
        })
    }

    pub fn order_shipped(order_id: AggregateId, tracking_ref: String) -> Self {
        OrderEvent::OrderShipped(OrderShippedData {
            order_id,
            tracking_ref,
            shipped_at: Utc::now(),
        })
    }

    pub fn order_delivered(order_id: AggregateId) -> Self {
        OrderEvent::OrderDelivered(OrderDeliveredData {
            order_id,
            delivered_at: Utc::now(),
        })
    }

    pub fn order_cancelled(
        order_id: AggregateId,
        reason: impl Into<String>,
        previous_status: OrderStatus,
    ) -> Self {
        OrderEvent::OrderCancelled(OrderCancelledData {
            order_id,
            reason: reason.into(),
            previous_status,
            cancelled_at: Utc::now(),
        })
    }

    pub fn order_refunded(order_id: AggregateId, reason: impl Into<String>, amount: Money) -> Self {
        OrderEvent::OrderRefunded(OrderRefundedData {
            order_id,
            reason: reason.into(),
            amount,
            refunded_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paid_event_is_named_for_fulfillment() {
        let event = OrderEvent::order_paid(AggregateId::new(), "tx-1".into(), Money::from_cents(10));
        assert_eq!(event.event_type(), "OrderConfirmedForFulfillment");
    }

    #[test]
    fn cancelled_event_serializes_tagged() {
        let order_id = AggregateId::new();
        let event = OrderEvent::order_cancelled(order_id, "changed mind", OrderStatus::Paid);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "OrderCancelled");
        assert_eq!(json["data"]["previous_status"], "PAID");

        match serde_json::from_value::<OrderEvent>(json).unwrap() {
            OrderEvent::OrderCancelled(data) => {
                assert_eq!(data.order_id, order_id);
                assert_eq!(data.reason, "changed mind");
            }
            other => panic!("expected OrderCancelled, got {other:?}"),
        }
    }
}
