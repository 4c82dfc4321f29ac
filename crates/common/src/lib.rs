//! Identifiers shared by the order, payment, and logistics services.

mod types;

pub use types::{AggregateId, CustomerId};
