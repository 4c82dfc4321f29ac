use chrono::{DateTime, Utc};
use common::{AggregateId, CustomerId};
use event_store::{EventEnvelope, Version};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::Result;

/// A committed domain event as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    pub event_type: String,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub order_id: Option<AggregateId>,
    pub customer_id: Option<CustomerId>,
    pub occurred_on: DateTime<Utc>,
    /// Aggregate version after this event; strictly increasing per aggregate.
    pub version: Version,
    pub payload: serde_json::Value,
}

impl BusEvent {
    pub fn from_envelope(envelope: &EventEnvelope) -> Self {
        Self {
            event_type: envelope.event_type.clone(),
            aggregate_id: envelope.aggregate_id,
            aggregate_type: envelope.aggregate_type.clone(),
            order_id: envelope.order_id(),
            customer_id: envelope.customer_id(),
            occurred_on: envelope.timestamp,
            version: envelope.version,
            payload: envelope.payload.clone(),
        }
    }

    /// Deserializes the payload into a typed event.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

impl From<&EventEnvelope> for BusEvent {
    fn from(envelope: &EventEnvelope) -> Self {
        Self::from_envelope(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Captured {
        amount: i64,
    }

    #[test]
    fn carries_correlation_from_envelope() {
        let order_id = AggregateId::new();
        let customer_id = CustomerId::new();
        let envelope = EventEnvelope::builder()
            .event_type("PaymentSucceeded")
            .aggregate_id(AggregateId::new())
            .aggregate_type("PaymentTransaction")
            .version(Version::new(3))
            .payload_raw(serde_json::json!({"amount": 2500}))
            .order_id(order_id)
            .customer_id(customer_id)
            .build()
            .unwrap();

        let event = BusEvent::from(&envelope);

        assert_eq!(event.order_id, Some(order_id));
        assert_eq!(event.customer_id, Some(customer_id));
        assert_eq!(event.occurred_on, envelope.timestamp);
        assert_eq!(event.payload_as::<Captured>().unwrap(), Captured { amount: 2500 });
        assert_eq!(event.version, Version::new(3));
    }

    #[test]
    fn malformed_payload_is_not_retryable() {
        let envelope = EventEnvelope::builder()
            .event_type("PaymentSucceeded")
            .aggregate_id(AggregateId::new())
            .aggregate_type("PaymentTransaction")
            .version(Version::first())
            .payload_raw(serde_json::json!({"amount": "lots"}))
            .build()
            .unwrap();

        let err = BusEvent::from(&envelope).payload_as::<Captured>().unwrap_err();
        assert!(!err.is_retryable());
    }
}
