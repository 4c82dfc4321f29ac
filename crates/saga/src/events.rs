//! Saga domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::DomainEvent;
use serde::{Deserialize, Serialize};

/// Events that can occur during saga execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    SagaStarted(SagaStartedData),
    StepStarted(StepData),
    StepCompleted(StepCompletedData),
    StepFailed(StepFailedData),
    CompensationStarted(CompensationData),
    CompensationStepCompleted(StepData),
    /// Logged; the remaining compensations still run.
    CompensationStepFailed(StepFailedData),
    SagaCompleted(SagaCompletedData),
    SagaSuspended(SagaSuspendedData),
    SagaFailed(SagaFailedData),
}

impl DomainEvent for SagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::StepStarted(_) => "StepStarted",
            SagaEvent::StepCompleted(_) => "StepCompleted",
            SagaEvent::StepFailed(_) => "StepFailed",
            SagaEvent::CompensationStarted(_) => "CompensationStarted",
            SagaEvent::CompensationStepCompleted(_) => "CompensationStepCompleted",
            SagaEvent::CompensationStepFailed(_) => "CompensationStepFailed",
            SagaEvent::SagaCompleted(_) => "SagaCompleted",
            SagaEvent::SagaSuspended(_) => "SagaSuspended",
            SagaEvent::SagaFailed(_) => "SagaFailed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub saga_id: AggregateId,
    pub order_id: AggregateId,
    /// e.g. "OrderFulfillment".
    pub saga_type: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepData {
    pub step_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletedData {
    pub step_name: String,
    /// Set by capture_payment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<AggregateId>,
    /// Set by schedule_delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<AggregateId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailedData {
    pub step_name: String,
    pub error: String,
    /// Stable error code, see `domain::ErrorCode`.
    pub code: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationData {
    /// The step whose failure triggered compensation.
    pub from_step: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaCompletedData {
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaSuspendedData {
    pub reason: String,
    pub suspended_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaFailedData {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

// Convenience constructors
impl SagaEvent {
    pub fn saga_started(
        saga_id: AggregateId,
        order_id: AggregateId,
        saga_type: impl Into<String>,
    ) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            saga_id,
            order_id,
            saga_type: saga_type.into(),
            started_at: Utc::now(),
        })
    }

    pub fn step_started(step_name: impl Into<String>) -> Self {
        SagaEvent::StepStarted(StepData {
            step_name: step_name.into(),
        })
    }

    pub fn step_completed(step_name: impl Into<String>) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step_name: step_name.into(),
            transaction_id: None,
            delivery_id: None,
        })
    }

    pub fn payment_captured(step_name: impl Into<String>, transaction_id: AggregateId) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step_name: step_name.into(),
            transaction_id: Some(transaction_id),
            delivery_id: None,
        })
    }

    pub fn delivery_scheduled(step_name: impl Into<String>, delivery_id: AggregateId) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step_name: step_name.into(),
            transaction_id: None,
            delivery_id: Some(delivery_id),
        })
    }

    pub fn step_failed(
        step_name: impl Into<String>,
        error: &domain::DomainError,
    ) -> Self {
        SagaEvent::StepFailed(StepFailedData {
            step_name: step_name.into(),
            error: error.to_string(),
            code: error.code().as_str().to_string(),
            retryable: error.is_retryable(),
        })
    }

    pub fn compensation_started(from_step: impl Into<String>) -> Self {
        SagaEvent::CompensationStarted(CompensationData {
            from_step: from_step.into(),
        })
    }

    pub fn compensation_step_completed(step_name: impl Into<String>) -> Self {
        SagaEvent::CompensationStepCompleted(StepData {
            step_name: step_name.into(),
        })
    }

    pub fn compensation_step_failed(
        step_name: impl Into<String>,
        error: &domain::DomainError,
    ) -> Self {
        SagaEvent::CompensationStepFailed(StepFailedData {
            step_name: step_name.into(),
            error: error.to_string(),
            code: error.code().as_str().to_string(),
            retryable: error.is_retryable(),
        })
    }

    pub fn saga_completed() -> Self {
        SagaEvent::SagaCompleted(SagaCompletedData {
            completed_at: Utc::now(),
        })
    }

    pub fn saga_suspended(reason: impl Into<String>) -> Self {
        SagaEvent::SagaSuspended(SagaSuspendedData {
            reason: reason.into(),
            suspended_at: Utc::now(),
        })
    }

    pub fn saga_failed(reason: impl Into<String>) -> Self {
        SagaEvent::SagaFailed(SagaFailedData {
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{DomainError, FailureReason, PaymentError};

    #[test]
    fn test_step_failed_carries_code_and_retryable() {
        let err = DomainError::from(PaymentError::GatewayFailure {
            reason: FailureReason::Timeout,
            message: "no answer".into(),
        });
        let event = SagaEvent::step_failed("capture_payment", &err);
        assert_eq!(event.event_type(), "StepFailed");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["code"], "GATEWAY_FAILURE");
        assert_eq!(json["data"]["retryable"], true);
    }

    #[test]
    fn test_saga_started_data() {
        let saga_id = AggregateId::new();
        let order_id = AggregateId::new();
        let event = SagaEvent::saga_started(saga_id, order_id, "OrderFulfillment");

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: SagaEvent = serde_json::from_str(&json).unwrap();

        if let SagaEvent::SagaStarted(data) = deserialized {
            assert_eq!(data.saga_id, saga_id);
            assert_eq!(data.order_id, order_id);
            assert_eq!(data.saga_type, "OrderFulfillment");
        } else {
            panic!("Expected SagaStarted event");
        }
    }

    #[test]
    fn test_optional_step_refs_are_omitted() {
        let json = serde_json::to_value(SagaEvent::step_completed("mark_paid")).unwrap();
        assert!(json["data"].get("transaction_id").is_none());

        let delivery_id = AggregateId::new();
        let json =
            serde_json::to_value(SagaEvent::delivery_scheduled("schedule_delivery", delivery_id))
                .unwrap();
        assert_eq!(json["data"]["delivery_id"], delivery_id.to_string());
    }
}
