//! Advances orders in response to payment and delivery events.

use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::{DeliveryEvent, DeliveryStatus, DomainError, OrderLifecycle, OrderStatus, PaymentEvent};
use event_bus::{BusError, BusEvent, Subscriber};
use event_store::EventStore;

use crate::intervention::{InterventionKind, InterventionQueue};

const EVENT_TYPES: [&str; 4] = [
    "PaymentSucceeded",
    "DeliveryStatusChanged",
    "DeliveryCompleted",
    "DeliveryFailed",
];

/// Subscriber that keeps orders in step with their payment and delivery.
///
/// Each handler first checks whether the order is already where the event
/// would move it, so redelivery and replay are harmless. Subscribe it
/// wrapped in [`event_bus::Idempotent`] to skip repeats cheaply.
pub struct FulfillmentReactor<S: EventStore> {
    orders: Arc<OrderLifecycle<S>>,
    interventions: InterventionQueue,
}

impl<S: EventStore> FulfillmentReactor<S> {
    pub fn new(orders: Arc<OrderLifecycle<S>>, interventions: InterventionQueue) -> Self {
        Self {
            orders,
            interventions,
        }
    }

    async fn on_payment_succeeded(
        &self,
        order_id: AggregateId,
        payment_ref: &str,
    ) -> Result<(), DomainError> {
        let order = self.orders.get(order_id).await?;
        if order.status() != OrderStatus::Confirmed {
            tracing::debug!(%order_id, status = %order.status(), "order past confirmation, payment event ignored");
            return Ok(());
        }
        ignore_invalid_state(self.orders.mark_paid(order_id, payment_ref).await)
    }

    async fn on_dispatched(
        &self,
        order_id: AggregateId,
        delivery_id: AggregateId,
    ) -> Result<(), DomainError> {
        let order = self.orders.get(order_id).await?;
        if order.status() != OrderStatus::Paid {
            return Ok(());
        }
        let tracking_ref = format!("DLV-{delivery_id}");
        ignore_invalid_state(self.orders.ship(order_id, &tracking_ref).await)
    }

    async fn on_delivered(
        &self,
        order_id: AggregateId,
        delivery_id: AggregateId,
    ) -> Result<(), DomainError> {
        // The dispatch event may still be queued behind this one on replay.
        self.on_dispatched(order_id, delivery_id).await?;

        let order = self.orders.get(order_id).await?;
        if order.status() != OrderStatus::Shipped {
            return Ok(());
        }
        ignore_invalid_state(self.orders.deliver(order_id).await)
    }

    async fn dispatch(&self, event: &BusEvent) -> Result<(), BusError> {
        let Some(order_id) = event.order_id else {
            return Err(BusError::permanent(format!(
                "{} {} carries no order id",
                event.event_type, event.aggregate_id
            )));
        };

        let outcome = match event.event_type.as_str() {
            "PaymentSucceeded" => match event.payload_as::<PaymentEvent>()? {
                PaymentEvent::PaymentSucceeded(data) => {
                    self.on_payment_succeeded(order_id, &data.gateway_transaction_id)
                        .await
                }
                _ => Ok(()),
            },
            "DeliveryStatusChanged" => match event.payload_as::<DeliveryEvent>()? {
                DeliveryEvent::DeliveryStatusChanged(data)
                    if data.to == DeliveryStatus::InTransit =>
                {
                    self.on_dispatched(order_id, data.delivery_id).await
                }
                _ => Ok(()),
            },
            "DeliveryCompleted" => self.on_delivered(order_id, event.aggregate_id).await,
            "DeliveryFailed" => {
                let reason = match event.payload_as::<DeliveryEvent>()? {
                    DeliveryEvent::DeliveryFailed(data) => data.reason,
                    _ => String::from("unknown"),
                };
                self.interventions
                    .raise(
                        InterventionKind::DeliveryFailed,
                        order_id,
                        event.aggregate_id,
                        format!("delivery failed (version {}): {reason}", event.version),
                    )
                    .await;
                Ok(())
            }
            _ => Ok(()),
        };

        outcome.map_err(|err| {
            if err.is_retryable() {
                BusError::retryable(err.to_string())
            } else {
                BusError::permanent(err.to_string())
            }
        })
    }
}

/// A rejected transition here means another path already moved the order.
fn ignore_invalid_state<T>(result: Result<T, DomainError>) -> Result<(), DomainError> {
    match result {
        Ok(_) => Ok(()),
        Err(err) if err.is_invalid_state() => {
            tracing::debug!(error = %err, "order already moved, event treated as applied");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

#[async_trait]
impl<S: EventStore> Subscriber for FulfillmentReactor<S> {
    fn name(&self) -> &str {
        "fulfillment-reactor"
    }

    fn interested_in(&self, event_type: &str) -> bool {
        EVENT_TYPES.contains(&event_type)
    }

    async fn handle(&self, event: &BusEvent) -> event_bus::Result<()> {
        self.dispatch(event).await
    }
}
