//! Order commands.

use common::{AggregateId, CustomerId};

use crate::delivery::DeliveryType;
use crate::value_objects::Address;

use super::OrderLineItem;

/// Request to open a new order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub items: Vec<OrderLineItem>,
    pub shipping_address: Address,
    pub delivery_type: DeliveryType,
}

impl CreateOrder {
    /// Creates the command with a generated order ID.
    pub fn new(
        customer_id: CustomerId,
        items: Vec<OrderLineItem>,
        shipping_address: Address,
        delivery_type: DeliveryType,
    ) -> Self {
        Self {
            order_id: AggregateId::new(),
            customer_id,
            items,
            shipping_address,
            delivery_type,
        }
    }

    pub fn with_order_id(mut self, order_id: AggregateId) -> Self {
        self.order_id = order_id;
        self
    }
}
