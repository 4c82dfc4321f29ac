use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use dashmap::DashMap;
use event_store::Version;
use tokio::sync::Mutex;

use crate::{BusEvent, Result};

/// Reacts to events published on the bus.
///
/// Delivery is at-least-once, so `handle` may see the same event again
/// after a retry or a replay. Wrap non-idempotent handlers in [`Idempotent`].
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;

    /// Events this subscriber wants. Defaults to all of them.
    fn interested_in(&self, _event_type: &str) -> bool {
        true
    }

    async fn handle(&self, event: &BusEvent) -> Result<()>;
}

/// Skips events at or below the last version handled for their aggregate.
///
/// Relies on the bus delivering each aggregate's events in version order,
/// which holds per subscriber. State is one version per aggregate seen.
pub struct Idempotent<S> {
    inner: S,
    high_water: DashMap<AggregateId, Version>,
}

impl<S: Subscriber> Idempotent<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            high_water: DashMap::new(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Last version handled for `aggregate_id`.
    pub fn handled_through(&self, aggregate_id: AggregateId) -> Option<Version> {
        self.high_water.get(&aggregate_id).map(|v| *v)
    }

    /// Number of aggregates being tracked.
    pub fn tracked_aggregates(&self) -> usize {
        self.high_water.len()
    }

    /// Stops tracking an aggregate that will publish nothing further.
    pub fn forget(&self, aggregate_id: AggregateId) {
        self.high_water.remove(&aggregate_id);
    }
}

#[async_trait]
impl<S: Subscriber> Subscriber for Idempotent<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn interested_in(&self, event_type: &str) -> bool {
        self.inner.interested_in(event_type)
    }

    async fn handle(&self, event: &BusEvent) -> Result<()> {
        if self
            .handled_through(event.aggregate_id)
            .is_some_and(|seen| event.version <= seen)
        {
            tracing::debug!(
                subscriber = self.inner.name(),
                event_type = %event.event_type,
                aggregate_id = %event.aggregate_id,
                "duplicate delivery skipped"
            );
            return Ok(());
        }

        self.inner.handle(event).await?;
        self.high_water
            .entry(event.aggregate_id)
            .and_modify(|seen| *seen = (*seen).max(event.version))
            .or_insert(event.version);
        Ok(())
    }
}

/// Keeps every event it receives.
#[derive(Clone, Default)]
pub struct RecordingSubscriber {
    events: Arc<Mutex<Vec<BusEvent>>>,
    only: Option<Vec<String>>,
}

impl RecordingSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records only the given event types.
    pub fn only(event_types: &[&str]) -> Self {
        Self {
            events: Arc::default(),
            only: Some(event_types.iter().map(|t| t.to_string()).collect()),
        }
    }

    pub async fn events(&self) -> Vec<BusEvent> {
        self.events.lock().await.clone()
    }

    pub async fn count_of(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}

#[async_trait]
impl Subscriber for RecordingSubscriber {
    fn name(&self) -> &str {
        "recorder"
    }

    fn interested_in(&self, event_type: &str) -> bool {
        self.only
            .as_ref()
            .is_none_or(|types| types.iter().any(|t| t == event_type))
    }

    async fn handle(&self, event: &BusEvent) -> Result<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
