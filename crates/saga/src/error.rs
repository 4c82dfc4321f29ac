//! Saga error types and the payload surfaced to callers.

use common::AggregateId;
use domain::{DomainError, ErrorCode, OrderStatus};
use event_store::EventStoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A step was rejected. Completed steps were compensated unless the
    /// failure is retryable.
    #[error("Saga step '{step}' failed for order {order_id}: {source}")]
    StepFailed {
        saga_id: AggregateId,
        order_id: AggregateId,
        step: &'static str,
        #[source]
        source: DomainError,
    },

    #[error("Order {order_id} is {status}, expected {expected}")]
    OrderNotReady {
        order_id: AggregateId,
        status: OrderStatus,
        expected: &'static str,
    },

    #[error("Saga not found: {0}")]
    SagaNotFound(AggregateId),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

/// Error shape returned to API callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    pub correlation_id: String,
}

impl SagaError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SagaError::StepFailed { source, .. } | SagaError::Domain(source) => source.code(),
            SagaError::OrderNotReady { .. } => ErrorCode::InvalidStateTransition,
            SagaError::SagaNotFound(_) => ErrorCode::ResourceNotFound,
            SagaError::EventStore(EventStoreError::ConcurrencyConflict { .. }) => {
                ErrorCode::ConcurrencyConflict
            }
            SagaError::EventStore(_) | SagaError::Serialization(_) => ErrorCode::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SagaError::StepFailed { source, .. } | SagaError::Domain(source) => {
                source.is_retryable()
            }
            SagaError::EventStore(EventStoreError::ConcurrencyConflict { .. }) => true,
            _ => false,
        }
    }

    /// The step that failed, for step failures.
    pub fn step(&self) -> Option<&'static str> {
        match self {
            SagaError::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }

    pub fn to_payload(&self, correlation_id: impl Into<String>) -> ErrorPayload {
        ErrorPayload {
            code: self.code(),
            message: self.to_string(),
            retryable: self.is_retryable(),
            correlation_id: correlation_id.into(),
        }
    }
}
