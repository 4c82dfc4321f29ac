use chrono::{DateTime, Utc};

use crate::{AggregateId, CustomerId, EventEnvelope};

/// Filter over the event log.
///
/// Every set field narrows the result; an empty query matches every event.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub aggregate_id: Option<AggregateId>,
    pub aggregate_type: Option<String>,
    /// Any of these event types.
    pub event_types: Option<Vec<String>>,
    /// Events correlated with this order through metadata.
    pub order_id: Option<AggregateId>,
    pub customer_id: Option<CustomerId>,
    /// Events that occurred at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events of a single aggregate type ("Order", "PaymentTransaction", ...).
    pub fn for_aggregate_type(aggregate_type: impl Into<String>) -> Self {
        Self::new().aggregate_type(aggregate_type)
    }

    /// Events belonging to or correlated with an order.
    pub fn for_order(order_id: AggregateId) -> Self {
        Self::new().order_id(order_id)
    }

    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types = Some(vec![event_type.into()]);
        self
    }

    pub fn event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    pub fn order_id(mut self, order_id: AggregateId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn customer_id(mut self, customer_id: CustomerId) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if the envelope passes every filter except `limit`.
    pub fn matches(&self, event: &EventEnvelope) -> bool {
        if let Some(id) = self.aggregate_id
            && event.aggregate_id != id
        {
            return false;
        }
        if let Some(ref aggregate_type) = self.aggregate_type
            && &event.aggregate_type != aggregate_type
        {
            return false;
        }
        if let Some(ref types) = self.event_types
            && !types.iter().any(|t| t == &event.event_type)
        {
            return false;
        }
        if let Some(order_id) = self.order_id
            && event.order_id() != Some(order_id)
        {
            return false;
        }
        if let Some(customer_id) = self.customer_id
            && event.customer_id() != Some(customer_id)
        {
            return false;
        }
        if let Some(since) = self.since
            && event.timestamp < since
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Version;

    fn payment_event(order_id: AggregateId, customer_id: CustomerId) -> EventEnvelope {
        EventEnvelope::builder()
            .event_type("PaymentInitiated")
            .aggregate_id(AggregateId::new())
            .aggregate_type("PaymentTransaction")
            .version(Version::first())
            .payload_raw(serde_json::json!({}))
            .order_id(order_id)
            .customer_id(customer_id)
            .build()
            .unwrap()
    }

    #[test]
    fn empty_query_matches_everything() {
        let event = payment_event(AggregateId::new(), CustomerId::new());
        assert!(EventQuery::new().matches(&event));
    }

    #[test]
    fn order_filter_uses_correlation_metadata() {
        let order_id = AggregateId::new();
        let event = payment_event(order_id, CustomerId::new());

        assert!(EventQuery::for_order(order_id).matches(&event));
        assert!(!EventQuery::for_order(AggregateId::new()).matches(&event));
    }

    #[test]
    fn combined_filters_must_all_hold() {
        let customer_id = CustomerId::new();
        let event = payment_event(AggregateId::new(), customer_id);

        let query = EventQuery::for_aggregate_type("PaymentTransaction")
            .customer_id(customer_id)
            .event_types(vec!["PaymentInitiated".into(), "PaymentFailed".into()]);
        assert!(query.matches(&event));

        let wrong_type = query.clone().event_type("PaymentSucceeded");
        assert!(!wrong_type.matches(&event));

        let later = query.since(event.timestamp + chrono::Duration::seconds(1));
        assert!(!later.matches(&event));
    }
}
