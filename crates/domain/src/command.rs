//! Command handling infrastructure.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{AppendOptions, EventEnvelope, EventStore, Version};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;
use crate::locks::{EntityGuard, EntityLocks};

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted. Empty for a no-op.
    pub events: Vec<A::Event>,

    /// The persisted envelopes, ready to publish.
    pub envelopes: Vec<EventEnvelope>,

    pub new_version: Version,
}

impl<A: Aggregate> CommandResult<A> {
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

/// Loads, decides and appends for one aggregate type.
///
/// `execute` holds the entity lock from load to append, so two commands on
/// the same id never decide from the same state. The append still carries
/// the expected version, which catches writers outside this process.
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    locks: EntityLocks,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: EntityLocks::new(),
            _phantom: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Takes the entity lock for use with [`CommandHandler::execute_locked`].
    pub async fn lock(&self, aggregate_id: AggregateId) -> EntityGuard {
        self.locks.lock(aggregate_id).await
    }

    /// Rebuilds an aggregate. Returns the default instance if it has no events.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let events = self.store.get_events_for_aggregate(aggregate_id).await?;

        let mut aggregate = A::default();
        for envelope in events {
            let event: A::Event = serde_json::from_value(envelope.payload)?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// Loads an aggregate, failing with `NotFound` if it doesn't exist.
    pub async fn get(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        self.load_existing(aggregate_id)
            .await?
            .ok_or(DomainError::NotFound {
                aggregate_type: A::aggregate_type(),
                aggregate_id,
            })
    }

    /// Runs a command under the entity lock and persists its events.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let guard = self.lock(aggregate_id).await;
        self.execute_locked(&guard, aggregate_id, command_fn).await
    }

    /// Like [`CommandHandler::execute`] but fails with `NotFound` for an
    /// aggregate with no events instead of handing the command a blank one.
    pub async fn execute_existing<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let guard = self.lock(aggregate_id).await;
        self.execute_existing_locked(&guard, aggregate_id, command_fn)
            .await
    }

    /// Runs a command while the caller already holds the entity lock.
    pub async fn execute_locked<F>(
        &self,
        guard: &EntityGuard,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        debug_assert_eq!(guard.id(), aggregate_id);
        let aggregate = self.load(aggregate_id).await?;
        self.decide_and_append(aggregate_id, aggregate, command_fn)
            .await
    }

    pub async fn execute_existing_locked<F>(
        &self,
        guard: &EntityGuard,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        debug_assert_eq!(guard.id(), aggregate_id);
        let aggregate = self.load(aggregate_id).await?;
        if aggregate.id().is_none() {
            return Err(DomainError::NotFound {
                aggregate_type: A::aggregate_type(),
                aggregate_id,
            });
        }
        self.decide_and_append(aggregate_id, aggregate, command_fn)
            .await
    }

    async fn decide_and_append<F>(
        &self,
        aggregate_id: AggregateId,
        mut aggregate: A,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let current_version = aggregate.version();
        let events = command_fn(&aggregate)?;

        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events,
                envelopes: vec![],
                new_version: current_version,
            });
        }

        // Applied first so the envelopes can carry post-event correlation ids.
        aggregate.apply_events(events.iter().cloned());
        let envelopes = Self::build_envelopes(aggregate_id, current_version, &aggregate, &events)?;

        let options = if current_version == Version::initial() {
            AppendOptions::expect_new()
        } else {
            AppendOptions::expect_version(current_version)
        };
        let new_version = self.store.append(envelopes.clone(), options).await?;
        aggregate.set_version(new_version);

        Ok(CommandResult {
            aggregate,
            events,
            envelopes,
            new_version,
        })
    }

    fn build_envelopes(
        aggregate_id: AggregateId,
        current_version: Version,
        aggregate: &A,
        events: &[A::Event],
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = current_version;

        for event in events {
            version = version.next();
            let mut builder = EventEnvelope::builder()
                .aggregate_id(aggregate_id)
                .aggregate_type(A::aggregate_type())
                .event_type(event.event_type())
                .version(version)
                .payload(event)?;
            if let Some(order_id) = aggregate.order_id() {
                builder = builder.order_id(order_id);
            }
            if let Some(customer_id) = aggregate.customer_id() {
                builder = builder.customer_id(customer_id);
            }
            envelopes.push(builder.build()?);
        }

        Ok(envelopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::{EventStoreError, InMemoryEventStore};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum TicketEvent {
        Opened { id: AggregateId, order_id: AggregateId },
        Closed,
    }

    impl DomainEvent for TicketEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TicketEvent::Opened { .. } => "TicketOpened",
                TicketEvent::Closed => "TicketClosed",
            }
        }
    }

    #[derive(Debug, Default)]
    struct Ticket {
        id: Option<AggregateId>,
        order_id: Option<AggregateId>,
        closed: bool,
        version: Version,
    }

    #[derive(Debug, thiserror::Error)]
    enum TicketError {
        #[error("already closed")]
        AlreadyClosed,
    }

    impl From<TicketError> for DomainError {
        fn from(_: TicketError) -> Self {
            DomainError::Internal("ticket already closed".to_string())
        }
    }

    impl Aggregate for Ticket {
        type Event = TicketEvent;
        type Error = TicketError;

        fn aggregate_type() -> &'static str {
            "Ticket"
        }

        fn id(&self) -> Option<AggregateId> {
            self.id
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                TicketEvent::Opened { id, order_id } => {
                    self.id = Some(id);
                    self.order_id = Some(order_id);
                }
                TicketEvent::Closed => self.closed = true,
            }
        }

        fn order_id(&self) -> Option<AggregateId> {
            self.order_id
        }
    }

    impl Ticket {
        fn close(&self) -> Result<Vec<TicketEvent>, TicketError> {
            if self.closed {
                return Err(TicketError::AlreadyClosed);
            }
            Ok(vec![TicketEvent::Closed])
        }
    }

    fn handler() -> CommandHandler<InMemoryEventStore, Ticket> {
        CommandHandler::new(InMemoryEventStore::new())
    }

    #[tokio::test]
    async fn envelopes_carry_order_correlation() {
        let handler = handler();
        let id = AggregateId::new();
        let order_id = AggregateId::new();

        let result = handler
            .execute(id, |_| Ok(vec![TicketEvent::Opened { id, order_id }]))
            .await
            .unwrap();

        assert_eq!(result.new_version, Version::first());
        assert_eq!(result.envelopes.len(), 1);
        assert_eq!(result.envelopes[0].order_id(), Some(order_id));
        assert_eq!(result.envelopes[0].event_type, "TicketOpened");
    }

    #[tokio::test]
    async fn rejected_command_persists_nothing() {
        let handler = handler();
        let id = AggregateId::new();
        handler
            .execute(id, |_| {
                Ok(vec![
                    TicketEvent::Opened {
                        id,
                        order_id: AggregateId::new(),
                    },
                    TicketEvent::Closed,
                ])
            })
            .await
            .unwrap();

        let result = handler.execute_existing(id, |t| t.close()).await;

        assert!(result.is_err());
        assert_eq!(handler.store().event_count().await, 2);
    }

    #[tokio::test]
    async fn missing_aggregate_is_not_found() {
        let handler = handler();
        let id = AggregateId::new();

        let err = handler.execute_existing(id, |t| t.close()).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { aggregate_type: "Ticket", .. }));
        assert!(matches!(
            handler.get(id).await,
            Err(DomainError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn empty_decision_is_a_noop() {
        let handler = handler();
        let result = handler.execute(AggregateId::new(), |_| Ok(vec![])).await.unwrap();

        assert!(result.is_noop());
        assert!(result.envelopes.is_empty());
        assert_eq!(handler.store().event_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_closes_record_one_event() {
        let handler = std::sync::Arc::new(handler());
        let id = AggregateId::new();
        handler
            .execute(id, |_| {
                Ok(vec![TicketEvent::Opened {
                    id,
                    order_id: AggregateId::new(),
                }])
            })
            .await
            .unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let handler = handler.clone();
                tokio::spawn(async move { handler.execute_existing(id, |t| t.close()).await })
            })
            .collect();

        let mut successes = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(handler.store().event_count().await, 2);
    }

    #[tokio::test]
    async fn stale_writer_outside_the_lock_conflicts() {
        let store = InMemoryEventStore::new();
        let first: CommandHandler<_, Ticket> = CommandHandler::new(store.clone());
        let second: CommandHandler<_, Ticket> = CommandHandler::new(store.clone());
        let id = AggregateId::new();
        let order_id = AggregateId::new();

        first
            .execute(id, |_| Ok(vec![TicketEvent::Opened { id, order_id }]))
            .await
            .unwrap();

        // Separate handlers do not share locks; the version check still holds.
        let stale = first.load(id).await.unwrap();
        first.execute_existing(id, |t| t.close()).await.unwrap();
        let err = second
            .decide_and_append(id, stale, |t| t.close())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::EventStore(EventStoreError::ConcurrencyConflict { .. })
        ));
    }
}
