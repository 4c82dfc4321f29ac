//! Append-only event log keyed by aggregate id.
//!
//! This is the persistence capability the lifecycles rely on: `get` is
//! [`EventStore::get_events_for_aggregate`], `put` is [`EventStore::append`]
//! with an expected version, and `exists` is [`EventStoreExt::aggregate_exists`].

pub mod error;
pub mod event;
pub mod memory;
pub mod query;
pub mod store;

pub use common::{AggregateId, CustomerId};
pub use error::{EventStoreError, Result};
pub use event::{CUSTOMER_ID_KEY, EventEnvelope, EventEnvelopeBuilder, EventId, ORDER_ID_KEY, Version};
pub use memory::InMemoryEventStore;
pub use query::EventQuery;
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream};
