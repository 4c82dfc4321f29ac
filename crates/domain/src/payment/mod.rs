//! Payment transactions and their lifecycle.

mod aggregate;
mod events;
mod gateway;
mod service;
mod state;

pub use aggregate::{InitiatePayment, PaymentFailure, PaymentTransaction, PendingRefund};
pub use events::{
    PaymentCancelledData, PaymentDetails, PaymentEvent, PaymentFailedData, PaymentInitiatedData,
    PaymentProcessingData, PaymentRefundAbandonedData, PaymentRefundRequestedData,
    PaymentRefundedData, PaymentSucceededData,
};
pub use gateway::{
    ChargeRequest, GatewayDecline, GatewayReceipt, InMemoryPaymentGateway, PaymentGateway,
    PaymentMethod,
};
pub use service::{PaymentConfig, PaymentLifecycle};
pub use state::{FailureReason, PaymentStatus};

use common::AggregateId;
use thiserror::Error;

use crate::error::ErrorCode;
use crate::value_objects::Money;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Invalid payment state: cannot move from {from} to {to}")]
    InvalidState {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("Order {order_id} already has active payment {transaction_id}")]
    DuplicateActivePayment {
        order_id: AggregateId,
        transaction_id: AggregateId,
    },

    #[error("Refund of {requested} exceeds the {available} still refundable")]
    InsufficientRefundAmount { requested: Money, available: Money },

    #[error("Invalid amount {amount} (must be greater than 0)")]
    InvalidAmount { amount: Money },

    #[error("Gateway failure ({reason}): {message}")]
    GatewayFailure {
        reason: FailureReason,
        message: String,
    },

    #[error("A refund of {amount} is already in progress")]
    RefundInProgress { amount: Money },

    #[error("No refund has been requested")]
    NoRefundRequested,

    #[error("Refund {gateway_refund_id} of {amount} was sent but could not be recorded")]
    RefundUnrecorded {
        amount: Money,
        gateway_refund_id: String,
    },

    #[error("Payment already initiated")]
    AlreadyInitiated,

    #[error("Payment has not been initiated")]
    NotInitiated,
}

impl PaymentError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PaymentError::InvalidState { .. }
            | PaymentError::AlreadyInitiated
            | PaymentError::RefundInProgress { .. }
            | PaymentError::NoRefundRequested => ErrorCode::InvalidStateTransition,
            PaymentError::RefundUnrecorded { .. } => ErrorCode::Internal,
            PaymentError::DuplicateActivePayment { .. } => ErrorCode::DuplicateActiveEntity,
            PaymentError::InsufficientRefundAmount { .. } => ErrorCode::InsufficientRefundAmount,
            PaymentError::InvalidAmount { .. } => ErrorCode::ValidationFailed,
            PaymentError::GatewayFailure { .. } => ErrorCode::GatewayFailure,
            PaymentError::NotInitiated => ErrorCode::ResourceNotFound,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::GatewayFailure { reason, .. } => reason.retryable(),
            _ => false,
        }
    }
}

impl From<GatewayDecline> for PaymentError {
    fn from(decline: GatewayDecline) -> Self {
        PaymentError::GatewayFailure {
            reason: decline.reason,
            message: decline.message,
        }
    }
}
