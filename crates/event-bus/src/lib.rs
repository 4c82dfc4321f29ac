//! In-process event bus.
//!
//! - [`EventBus`] fans persisted events out to subscribers, each on its own queue
//! - [`Subscriber`] is implemented by anything reacting to domain events
//! - [`Idempotent`] absorbs redelivered events so handlers can be at-least-once
//! - failed deliveries are retried, then parked as [`DeadLetter`]s

pub mod bus;
pub mod error;
pub mod event;
pub mod subscriber;

pub use bus::{BusConfig, DeadLetter, EventBus};
pub use error::{BusError, Result};
pub use event::BusEvent;
pub use subscriber::{Idempotent, RecordingSubscriber, Subscriber};
