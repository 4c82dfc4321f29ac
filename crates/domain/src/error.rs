//! Domain error types.

use common::AggregateId;
use event_store::EventStoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::delivery::DeliveryError;
use crate::order::OrderError;
use crate::payment::PaymentError;

/// Stable, caller-facing error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidStateTransition,
    DuplicateActiveEntity,
    InsufficientRefundAmount,
    ResourceNotFound,
    GatewayFailure,
    ConcurrencyConflict,
    ValidationFailed,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ErrorCode::DuplicateActiveEntity => "DUPLICATE_ACTIVE_ENTITY",
            ErrorCode::InsufficientRefundAmount => "INSUFFICIENT_REFUND_AMOUNT",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::GatewayFailure => "GATEWAY_FAILURE",
            ErrorCode::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("{aggregate_type} not found: {aggregate_id}")]
    NotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DomainError::EventStore(EventStoreError::ConcurrencyConflict { .. }) => {
                ErrorCode::ConcurrencyConflict
            }
            DomainError::EventStore(_) => ErrorCode::Internal,
            DomainError::Order(e) => e.code(),
            DomainError::Payment(e) => e.code(),
            DomainError::Delivery(e) => e.code(),
            DomainError::NotFound { .. } => ErrorCode::ResourceNotFound,
            DomainError::Serialization(_) | DomainError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether the same request may succeed if simply tried again.
    pub fn is_retryable(&self) -> bool {
        match self {
            DomainError::EventStore(EventStoreError::ConcurrencyConflict { .. }) => true,
            DomainError::Payment(e) => e.is_retryable(),
            DomainError::Delivery(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// True for rejected transitions of any lifecycle.
    pub fn is_invalid_state(&self) -> bool {
        self.code() == ErrorCode::InvalidStateTransition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::Version;

    #[test]
    fn concurrency_conflict_is_retryable() {
        let err = DomainError::from(EventStoreError::ConcurrencyConflict {
            aggregate_id: AggregateId::new(),
            expected: Version::first(),
            actual: Version::new(2),
        });
        assert_eq!(err.code(), ErrorCode::ConcurrencyConflict);
        assert!(err.is_retryable());
    }

    #[test]
    fn not_found_code() {
        let err = DomainError::NotFound {
            aggregate_type: "Order",
            aggregate_id: AggregateId::new(),
        };
        assert_eq!(err.code().as_str(), "RESOURCE_NOT_FOUND");
        assert!(!err.is_retryable());
    }

    #[test]
    fn code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::InsufficientRefundAmount).unwrap();
        assert_eq!(json, "\"INSUFFICIENT_REFUND_AMOUNT\"");
    }
}
