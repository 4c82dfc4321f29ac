//! Order aggregate and its lifecycle.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;
mod value_objects;

pub use aggregate::{Order, OrderTimeline};
pub use commands::CreateOrder;
pub use events::{
    OrderCancelledData, OrderConfirmedData, OrderCreatedData, OrderDeliveredData, OrderEvent,
    OrderPaidData, OrderRefundedData, OrderShippedData,
};
pub use service::{OrderLifecycle, RefundPort};
pub use state::OrderStatus;
pub use value_objects::{OrderLineItem, OrderTotals, PricingPolicy, ProductId};

use thiserror::Error;

use crate::error::ErrorCode;
use crate::value_objects::Money;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Invalid order state: cannot move from {from} to {to}")]
    InvalidState { from: OrderStatus, to: OrderStatus },

    #[error("Order already created")]
    AlreadyCreated,

    #[error("Order has not been created")]
    NotCreated,

    #[error("Order already paid with {payment_ref}")]
    AlreadyPaid { payment_ref: String },

    #[error("Order has no items")]
    NoItems,

    #[error("Invalid quantity for {product_id} (must be greater than 0)")]
    InvalidQuantity { product_id: String },

    #[error("Invalid price {price} for {product_id} (must be greater than 0)")]
    InvalidPrice { product_id: String, price: Money },

    #[error("Shipping address is missing {field}")]
    IncompleteAddress { field: &'static str },

    #[error("Missing {0}")]
    MissingReference(&'static str),

    #[error("Order amount exceeds the representable range")]
    AmountOverflow,
}

impl OrderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            OrderError::InvalidState { .. }
            | OrderError::AlreadyCreated
            | OrderError::AlreadyPaid { .. } => ErrorCode::InvalidStateTransition,
            OrderError::NotCreated => ErrorCode::ResourceNotFound,
            OrderError::NoItems
            | OrderError::InvalidQuantity { .. }
            | OrderError::InvalidPrice { .. }
            | OrderError::IncompleteAddress { .. }
            | OrderError::MissingReference(_)
            | OrderError::AmountOverflow => ErrorCode::ValidationFailed,
        }
    }
}
