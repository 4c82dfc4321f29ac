use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventQuery, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, EventStream, validate_events_for_append},
};

#[derive(Default)]
struct Log {
    /// Every event in insertion order.
    events: Vec<EventEnvelope>,
    /// Positions in `events` per aggregate, in version order.
    by_aggregate: HashMap<AggregateId, Vec<usize>>,
}

impl Log {
    fn version_of(&self, aggregate_id: AggregateId) -> Version {
        self.by_aggregate
            .get(&aggregate_id)
            .and_then(|positions| positions.last())
            .map(|&pos| self.events[pos].version)
            .unwrap_or_else(Version::initial)
    }
}

/// Process-local event store.
///
/// Appends for one aggregate are serialized by the write lock, so the
/// version check and the insert happen atomically.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }

    /// Number of distinct aggregates with at least one event.
    pub async fn aggregate_count(&self) -> usize {
        self.log.read().await.by_aggregate.len()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let first_new_version = events[0].version;

        let mut log = self.log.write().await;
        let current = log.version_of(aggregate_id);

        if let Some(expected) = options.expected_version
            && current != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current,
            });
        }

        // Stands in for a unique (aggregate_id, version) constraint.
        if first_new_version != current.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: first_new_version,
                actual: current,
            });
        }

        let mut last_version = current;
        for event in events {
            last_version = event.version;
            let pos = log.events.len();
            log.events.push(event);
            log.by_aggregate.entry(aggregate_id).or_default().push(pos);
        }

        tracing::trace!(%aggregate_id, version = %last_version, "events appended");
        Ok(last_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        Ok(log
            .by_aggregate
            .get(&aggregate_id)
            .map(|positions| positions.iter().map(|&p| log.events[p].clone()).collect())
            .unwrap_or_default())
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        let limit = query.limit.unwrap_or(usize::MAX);

        let matching: Vec<EventEnvelope> = match query.aggregate_id {
            Some(id) => log
                .by_aggregate
                .get(&id)
                .into_iter()
                .flatten()
                .map(|&p| &log.events[p])
                .filter(|e| query.matches(e))
                .take(limit)
                .cloned()
                .collect(),
            None => log
                .events
                .iter()
                .filter(|e| query.matches(e))
                .take(limit)
                .cloned()
                .collect(),
        };

        Ok(matching)
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.log.read().await.events.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let log = self.log.read().await;
        Ok(log
            .by_aggregate
            .contains_key(&aggregate_id)
            .then(|| log.version_of(aggregate_id)))
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;
    use crate::{CustomerId, EventStoreExt};

    fn event(aggregate_id: AggregateId, aggregate_type: &str, event_type: &str, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .event_type(event_type)
            .aggregate_id(aggregate_id)
            .aggregate_type(aggregate_type)
            .version(Version::new(version))
            .payload_raw(serde_json::json!({"n": version}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn append_and_load_in_version_order() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let version = store
            .append(
                vec![
                    event(id, "Order", "OrderCreated", 1),
                    event(id, "Order", "OrderConfirmed", 2),
                ],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();
        assert_eq!(version, Version::new(2));

        store
            .append(
                vec![event(id, "Order", "OrderCancelled", 3)],
                AppendOptions::expect_version(Version::new(2)),
            )
            .await
            .unwrap();

        let loaded = store.get_events_for_aggregate(id).await.unwrap();
        let types: Vec<_> = loaded.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, ["OrderCreated", "OrderConfirmed", "OrderCancelled"]);
        assert_eq!(
            store.get_aggregate_version(id).await.unwrap(),
            Some(Version::new(3))
        );
    }

    #[tokio::test]
    async fn stale_expected_version_conflicts() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, "Order", "OrderCreated", 1)], AppendOptions::expect_new())
            .await
            .unwrap();

        let err = store
            .append(vec![event(id, "Order", "OrderCreated", 1)], AppendOptions::expect_new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EventStoreError::ConcurrencyConflict { expected, actual, .. }
                if expected == Version::initial() && actual == Version::first()
        ));
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn unchecked_append_still_rejects_duplicate_versions() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, "Order", "OrderCreated", 1)], AppendOptions::new())
            .await
            .unwrap();

        let result = store
            .append(vec![event(id, "Order", "OrderConfirmed", 1)], AppendOptions::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_aggregate_has_no_version() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        assert!(store.get_aggregate_version(id).await.unwrap().is_none());
        assert!(!store.aggregate_exists(id).await.unwrap());
        assert!(store.get_events_for_aggregate(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_by_order_correlation() {
        let store = InMemoryEventStore::new();
        let order_id = AggregateId::new();
        let payment_id = AggregateId::new();

        let correlated = EventEnvelope::builder()
            .event_type("PaymentInitiated")
            .aggregate_id(payment_id)
            .aggregate_type("PaymentTransaction")
            .version(Version::first())
            .payload_raw(serde_json::json!({}))
            .order_id(order_id)
            .customer_id(CustomerId::new())
            .build()
            .unwrap();
        store
            .append(vec![correlated], AppendOptions::expect_new())
            .await
            .unwrap();
        store
            .append(
                vec![event(AggregateId::new(), "PaymentTransaction", "PaymentInitiated", 1)],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();

        let ids = store
            .aggregate_ids(
                EventQuery::for_aggregate_type("PaymentTransaction").order_id(order_id),
            )
            .await
            .unwrap();
        assert_eq!(ids, vec![payment_id]);
    }

    #[tokio::test]
    async fn query_limit_and_stream_preserve_insertion_order() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store
            .append(vec![event(a, "Order", "OrderCreated", 1)], AppendOptions::expect_new())
            .await
            .unwrap();
        store
            .append(vec![event(b, "Delivery", "DeliveryCreated", 1)], AppendOptions::expect_new())
            .await
            .unwrap();
        store
            .append(
                vec![event(a, "Order", "OrderConfirmed", 2)],
                AppendOptions::expect_version(Version::first()),
            )
            .await
            .unwrap();

        let first_two = store.query_events(EventQuery::new().limit(2)).await.unwrap();
        assert_eq!(first_two.len(), 2);
        assert_eq!(first_two[1].aggregate_id, b);

        let streamed: Vec<_> = store
            .stream_all_events()
            .await
            .unwrap()
            .map(|e| e.unwrap().event_type)
            .collect()
            .await;
        assert_eq!(streamed, ["OrderCreated", "DeliveryCreated", "OrderConfirmed"]);
        assert_eq!(store.aggregate_count().await, 2);
    }
}
