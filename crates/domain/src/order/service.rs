//! Order lifecycle: the only writer of Order state.

use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use event_bus::EventBus;
use event_store::{EventQuery, EventStore, EventStoreExt};

use crate::aggregate::Aggregate;
use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;
use crate::value_objects::Money;

use super::{CreateOrder, Order, OrderStatus, PricingPolicy};

/// Refunds captured payments on behalf of the order lifecycle.
///
/// Cancelling a PAID order calls this before the cancellation is recorded.
/// Implementations must be idempotent: with nothing left to refund they
/// return zero.
#[async_trait]
pub trait RefundPort: Send + Sync {
    async fn refund_order(&self, order_id: AggregateId, reason: &str) -> Result<Money, DomainError>;
}

pub struct OrderLifecycle<S: EventStore> {
    handler: CommandHandler<S, Order>,
    bus: EventBus,
    pricing: PricingPolicy,
    refunds: Arc<dyn RefundPort>,
}

impl<S: EventStore> OrderLifecycle<S> {
    pub fn new(
        store: S,
        bus: EventBus,
        pricing: PricingPolicy,
        refunds: Arc<dyn RefundPort>,
    ) -> Self {
        Self {
            handler: CommandHandler::new(store),
            bus,
            pricing,
            refunds,
        }
    }

    pub fn pricing(&self) -> &PricingPolicy {
        &self.pricing
    }

    /// Opens an order in PENDING with its totals fixed.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn create(&self, cmd: CreateOrder) -> Result<CommandResult<Order>, DomainError> {
        let result = self
            .handler
            .execute(cmd.order_id, |order| order.create(&cmd, &self.pricing))
            .await?;
        Ok(self.publish(result).await)
    }

    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, order_id: AggregateId) -> Result<CommandResult<Order>, DomainError> {
        let result = self
            .handler
            .execute_existing(order_id, |order| order.confirm())
            .await?;
        Ok(self.publish(result).await)
    }

    /// Moves a CONFIRMED order to PAID. Idempotent for the same `payment_ref`.
    #[tracing::instrument(skip(self))]
    pub async fn mark_paid(
        &self,
        order_id: AggregateId,
        payment_ref: &str,
    ) -> Result<CommandResult<Order>, DomainError> {
        let result = self
            .handler
            .execute_existing(order_id, |order| order.mark_paid(payment_ref))
            .await?;
        Ok(self.publish(result).await)
    }

    #[tracing::instrument(skip(self))]
    pub async fn ship(
        &self,
        order_id: AggregateId,
        tracking_ref: &str,
    ) -> Result<CommandResult<Order>, DomainError> {
        let result = self
            .handler
            .execute_existing(order_id, |order| order.ship(tracking_ref))
            .await?;
        Ok(self.publish(result).await)
    }

    #[tracing::instrument(skip(self))]
    pub async fn deliver(&self, order_id: AggregateId) -> Result<CommandResult<Order>, DomainError> {
        let result = self
            .handler
            .execute_existing(order_id, |order| order.deliver())
            .await?;
        Ok(self.publish(result).await)
    }

    /// Cancels from PENDING, CONFIRMED or PAID.
    ///
    /// A PAID order is refunded through the [`RefundPort`] first; if that
    /// fails the order stays PAID and the error is returned. The order lock
    /// is held throughout so nothing can ship it in between.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        order_id: AggregateId,
        reason: &str,
    ) -> Result<CommandResult<Order>, DomainError> {
        let guard = self.handler.lock(order_id).await;
        let order = self.handler.get(order_id).await?;

        if order.status() == OrderStatus::Paid {
            let refunded = self.refunds.refund_order(order_id, reason).await?;
            tracing::info!(%order_id, %refunded, "payment refunded ahead of cancellation");
        }

        let result = self
            .handler
            .execute_existing_locked(&guard, order_id, |order| order.cancel(reason))
            .await?;
        drop(guard);
        Ok(self.publish(result).await)
    }

    /// Records a full refund of a PAID, SHIPPED or DELIVERED order.
    /// The money itself is returned by the payment lifecycle.
    #[tracing::instrument(skip(self))]
    pub async fn refund(
        &self,
        order_id: AggregateId,
        reason: &str,
    ) -> Result<CommandResult<Order>, DomainError> {
        let result = self
            .handler
            .execute_existing(order_id, |order| order.refund(reason))
            .await?;
        Ok(self.publish(result).await)
    }

    pub async fn get(&self, order_id: AggregateId) -> Result<Order, DomainError> {
        self.handler.get(order_id).await
    }

    pub async fn find(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.load_existing(order_id).await
    }

    /// Every order currently in `status`.
    pub async fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<Order>, DomainError> {
        let ids = self
            .handler
            .store()
            .aggregate_ids(EventQuery::for_aggregate_type(Order::aggregate_type()))
            .await?;

        let mut orders = Vec::new();
        for id in ids {
            let order = self.handler.load(id).await?;
            if order.id().is_some() && order.status() == status {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    async fn publish(&self, result: CommandResult<Order>) -> CommandResult<Order> {
        if result.is_noop() {
            return result;
        }

        let status = result.aggregate.status();
        tracing::info!(
            order_id = ?result.aggregate.id(),
            status = %status,
            version = %result.new_version,
            "order transitioned"
        );
        metrics::counter!("order_transitions_total", "to" => status.as_str()).increment(1);
        self.bus.publish_envelopes(&result.envelopes).await;
        result
    }
}
