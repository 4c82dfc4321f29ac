//! Payment domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, CustomerId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::value_objects::Money;

use super::{FailureReason, PaymentMethod};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentEvent {
    PaymentInitiated(PaymentInitiatedData),
    PaymentProcessingStarted(PaymentProcessingData),
    PaymentSucceeded(PaymentSucceededData),
    PaymentFailed(PaymentFailedData),
    PaymentRefundRequested(PaymentRefundRequestedData),
    PaymentRefunded(PaymentRefundedData),
    PaymentRefundAbandoned(PaymentRefundAbandonedData),
    PaymentCancelled(PaymentCancelledData),
}

impl DomainEvent for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentInitiated(_) => "PaymentInitiated",
            PaymentEvent::PaymentProcessingStarted(_) => "PaymentProcessingStarted",
            PaymentEvent::PaymentSucceeded(_) => "PaymentSucceeded",
            PaymentEvent::PaymentFailed(_) => "PaymentFailed",
            PaymentEvent::PaymentRefundRequested(_) => "PaymentRefundRequested",
            PaymentEvent::PaymentRefunded(_) => "PaymentRefunded",
            PaymentEvent::PaymentRefundAbandoned(_) => "PaymentRefundAbandoned",
            PaymentEvent::PaymentCancelled(_) => "PaymentCancelled",
        }
    }
}

impl PaymentEvent {
    pub fn details(&self) -> &PaymentDetails {
        match self {
            PaymentEvent::PaymentInitiated(d) => &d.details,
            PaymentEvent::PaymentProcessingStarted(d) => &d.details,
            PaymentEvent::PaymentSucceeded(d) => &d.details,
            PaymentEvent::PaymentFailed(d) => &d.details,
            PaymentEvent::PaymentRefundRequested(d) => &d.details,
            PaymentEvent::PaymentRefunded(d) => &d.details,
            PaymentEvent::PaymentRefundAbandoned(d) => &d.details,
            PaymentEvent::PaymentCancelled(d) => &d.details,
        }
    }
}

/// Carried by every payment event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub transaction_id: AggregateId,
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInitiatedData {
    #[serde(flatten)]
    pub details: PaymentDetails,
    pub method: PaymentMethod,
    pub initiated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProcessingData {
    #[serde(flatten)]
    pub details: PaymentDetails,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSucceededData {
    #[serde(flatten)]
    pub details: PaymentDetails,
    pub gateway_transaction_id: String,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedData {
    #[serde(flatten)]
    pub details: PaymentDetails,
    pub reason: FailureReason,
    pub message: String,
    pub retryable: bool,
    pub failed_at: DateTime<Utc>,
}

/// Reserves a refund before the gateway is asked to send it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRefundRequestedData {
    #[serde(flatten)]
    pub details: PaymentDetails,
    pub refund_amount: Money,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRefundedData {
    #[serde(flatten)]
    pub details: PaymentDetails,
    pub refund_amount: Money,
    /// Sum of all refunds including this one.
    pub total_refunded: Money,
    pub reason: String,
    pub gateway_refund_id: String,
    /// True when this refund returned the remaining balance.
    pub fully_refunded: bool,
    pub refunded_at: DateTime<Utc>,
}

/// The gateway refused a requested refund; the reservation is released.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRefundAbandonedData {
    #[serde(flatten)]
    pub details: PaymentDetails,
    pub refund_amount: Money,
    pub message: String,
    pub abandoned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCancelledData {
    #[serde(flatten)]
    pub details: PaymentDetails,
    pub cancelled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_are_flattened_into_the_payload() {
        let details = PaymentDetails {
            transaction_id: AggregateId::new(),
            order_id: AggregateId::new(),
            customer_id: CustomerId::new(),
            amount: Money::from_cents(4_200),
        };
        let event = PaymentEvent::PaymentFailed(PaymentFailedData {
            details: details.clone(),
            reason: FailureReason::Timeout,
            message: "gateway timed out".into(),
            retryable: true,
            failed_at: Utc::now(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PaymentFailed");
        assert_eq!(json["data"]["reason"], "TIMEOUT");
        assert_eq!(json["data"]["order_id"], details.order_id.to_string());

        let back: PaymentEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.details(), &details);
    }
}
