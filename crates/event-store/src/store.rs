use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, EventEnvelope, EventQuery, EventStoreError, Result, Version};

/// Concurrency expectation for an append.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendOptions {
    /// Version the aggregate must be at before the append.
    /// `None` skips the check.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// The aggregate must not exist yet.
    pub fn expect_new() -> Self {
        Self::expect_version(Version::initial())
    }
}

/// A stream of events in insertion order.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Durable, append-only event log keyed by aggregate.
///
/// Loading an entity is `get_events_for_aggregate`, saving is `append`
/// and existence is `EventStoreExt::aggregate_exists`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends events atomically.
    ///
    /// Fails with `ConcurrencyConflict` when `options.expected_version`
    /// doesn't match the stored version. Returns the new version.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// All events for one aggregate, oldest first.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>>;

    /// Events matching `query`, in insertion order.
    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>>;

    /// Every stored event, in insertion order.
    async fn stream_all_events(&self) -> Result<EventStream>;

    /// Current version of an aggregate, or None if it has no events.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;
}

#[async_trait]
pub trait EventStoreExt: EventStore {
    async fn append_event(&self, event: EventEnvelope, options: AppendOptions) -> Result<Version> {
        self.append(vec![event], options).await
    }

    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.get_aggregate_version(aggregate_id).await?.is_some())
    }

    /// Distinct aggregate ids among the events matching `query`,
    /// in order of first appearance.
    async fn aggregate_ids(&self, query: EventQuery) -> Result<Vec<AggregateId>> {
        let events = self.query_events(query).await?;
        let mut seen = HashSet::new();
        Ok(events
            .into_iter()
            .map(|e| e.aggregate_id)
            .filter(|id| seen.insert(*id))
            .collect())
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks that a batch targets one aggregate with contiguous versions.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty batch".to_string(),
        ));
    };

    let mut expected_version = first.version;
    for event in &events[1..] {
        if event.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(
                "all events must target the same aggregate".to_string(),
            ));
        }
        if event.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::InvalidAppend(
                "all events must share an aggregate type".to_string(),
            ));
        }
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "versions must be contiguous: expected {}, got {}",
                expected_version, event.version
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(aggregate_id: AggregateId, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .event_type("OrderCreated")
            .aggregate_id(aggregate_id)
            .aggregate_type("Order")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    #[test]
    fn empty_batch_is_invalid() {
        assert!(matches!(
            validate_events_for_append(&[]),
            Err(EventStoreError::InvalidAppend(_))
        ));
    }

    #[test]
    fn mixed_aggregates_are_invalid() {
        let batch = [event(AggregateId::new(), 1), event(AggregateId::new(), 2)];
        assert!(validate_events_for_append(&batch).is_err());
    }

    #[test]
    fn version_gap_is_invalid() {
        let id = AggregateId::new();
        let batch = [event(id, 1), event(id, 3)];
        assert!(validate_events_for_append(&batch).is_err());

        let batch = [event(id, 1), event(id, 2)];
        assert!(validate_events_for_append(&batch).is_ok());
    }
}
