//! Delivery lifecycle: the only writer of DeliveryRequest state.

use std::sync::Arc;

use common::{AggregateId, CustomerId};
use event_bus::EventBus;
use event_store::{EventQuery, EventStore, EventStoreExt};

use crate::aggregate::Aggregate;
use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;
use crate::locks::EntityLocks;
use crate::value_objects::Address;

use super::{
    CarrierClient, CreateDelivery, DeliveryAction, DeliveryError, DeliveryRequest, DeliveryStatus,
    DeliveryType,
};

pub struct DeliveryLifecycle<S: EventStore> {
    handler: CommandHandler<S, DeliveryRequest>,
    bus: EventBus,
    carrier: Arc<dyn CarrierClient>,
    /// Serializes the one-active-delivery check per order.
    order_locks: EntityLocks,
}

impl<S: EventStore> DeliveryLifecycle<S> {
    pub fn new(store: S, bus: EventBus, carrier: Arc<dyn CarrierClient>) -> Self {
        Self {
            handler: CommandHandler::new(store),
            bus,
            carrier,
            order_locks: EntityLocks::new(),
        }
    }

    /// Opens a PENDING delivery for an order that has none active.
    #[tracing::instrument(skip(self, address))]
    pub async fn create(
        &self,
        order_id: AggregateId,
        customer_id: CustomerId,
        address: Address,
        delivery_type: DeliveryType,
    ) -> Result<CommandResult<DeliveryRequest>, DomainError> {
        self.check_address(&address).await?;

        let cmd = CreateDelivery::new(order_id, customer_id, address, delivery_type);
        let order_guard = self.order_locks.lock(order_id).await;
        if let Some(delivery_id) = self
            .active_delivery_for_order(order_id)
            .await?
            .and_then(|active| active.id())
        {
            return Err(DeliveryError::DuplicateActiveDelivery {
                order_id,
                delivery_id,
            }
            .into());
        }
        let result = self
            .handler
            .execute(cmd.delivery_id, |delivery| delivery.create(&cmd))
            .await?;
        drop(order_guard);

        Ok(self.publish(result).await)
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_status(
        &self,
        delivery_id: AggregateId,
        status: DeliveryStatus,
    ) -> Result<CommandResult<DeliveryRequest>, DomainError> {
        let result = self
            .handler
            .execute_existing(delivery_id, |delivery| delivery.update_status(status))
            .await?;
        Ok(self.publish(result).await)
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_tracking_number(
        &self,
        delivery_id: AggregateId,
        tracking_number: &str,
    ) -> Result<CommandResult<DeliveryRequest>, DomainError> {
        let result = self
            .handler
            .execute_existing(delivery_id, |delivery| {
                delivery.set_tracking_number(tracking_number)
            })
            .await?;
        Ok(self.publish(result).await)
    }

    /// Changes the destination of a PENDING delivery after the carrier
    /// accepts it.
    #[tracing::instrument(skip(self, address))]
    pub async fn update_address(
        &self,
        delivery_id: AggregateId,
        address: Address,
    ) -> Result<CommandResult<DeliveryRequest>, DomainError> {
        let current = self.handler.get(delivery_id).await?;
        if current.status() != DeliveryStatus::Pending {
            return Err(
                DeliveryError::invalid_state(current.status(), DeliveryAction::ChangeAddress)
                    .into(),
            );
        }
        self.check_address(&address).await?;

        let result = self
            .handler
            .execute_existing(delivery_id, |delivery| delivery.update_address(&address))
            .await?;
        Ok(self.publish(result).await)
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_failed(
        &self,
        delivery_id: AggregateId,
        reason: &str,
    ) -> Result<CommandResult<DeliveryRequest>, DomainError> {
        let result = self
            .handler
            .execute_existing(delivery_id, |delivery| delivery.mark_failed(reason))
            .await?;
        Ok(self.publish(result).await)
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        delivery_id: AggregateId,
    ) -> Result<CommandResult<DeliveryRequest>, DomainError> {
        let result = self
            .handler
            .execute_existing(delivery_id, |delivery| delivery.cancel())
            .await?;
        Ok(self.publish(result).await)
    }

    #[tracing::instrument(skip(self))]
    pub async fn deliver(
        &self,
        delivery_id: AggregateId,
    ) -> Result<CommandResult<DeliveryRequest>, DomainError> {
        let result = self
            .handler
            .execute_existing(delivery_id, |delivery| delivery.deliver())
            .await?;
        Ok(self.publish(result).await)
    }

    pub async fn get(&self, delivery_id: AggregateId) -> Result<DeliveryRequest, DomainError> {
        self.handler.get(delivery_id).await
    }

    /// Every delivery recorded for an order, oldest first.
    pub async fn deliveries_for_order(
        &self,
        order_id: AggregateId,
    ) -> Result<Vec<DeliveryRequest>, DomainError> {
        let query =
            EventQuery::for_aggregate_type(DeliveryRequest::aggregate_type()).order_id(order_id);
        let ids = self.handler.store().aggregate_ids(query).await?;

        let mut deliveries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(delivery) = self.handler.load_existing(id).await? {
                deliveries.push(delivery);
            }
        }
        Ok(deliveries)
    }

    /// The order's delivery that has not been cancelled, if any.
    pub async fn active_delivery_for_order(
        &self,
        order_id: AggregateId,
    ) -> Result<Option<DeliveryRequest>, DomainError> {
        Ok(self
            .deliveries_for_order(order_id)
            .await?
            .into_iter()
            .find(|delivery| delivery.status() != DeliveryStatus::Cancelled))
    }

    async fn check_address(&self, address: &Address) -> Result<(), DomainError> {
        self.carrier.validate_address(address).await?;
        if !self.carrier.is_in_range(address).await? {
            return Err(DeliveryError::OutOfServiceArea {
                postal_code: address.postal_code.clone(),
                country: address.country.clone(),
            }
            .into());
        }
        Ok(())
    }

    async fn publish(
        &self,
        result: CommandResult<DeliveryRequest>,
    ) -> CommandResult<DeliveryRequest> {
        if result.is_noop() {
            return result;
        }

        let status = result.aggregate.status();
        tracing::info!(
            delivery_id = ?result.aggregate.id(),
            order_id = ?result.aggregate.order_id(),
            status = %status,
            version = %result.new_version,
            "delivery updated"
        );
        metrics::counter!("delivery_transitions_total", "to" => status.as_str()).increment(1);
        self.bus.publish_envelopes(&result.envelopes).await;
        result
    }
}
