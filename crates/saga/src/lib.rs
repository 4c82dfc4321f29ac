//! Order fulfillment sagas.
//!
//! [`OrderFulfillmentCoordinator`] runs the customer-facing operations
//! (place, retry payment, cancel, refund) as event-sourced sagas over the
//! order, payment and delivery lifecycles. Each step is recorded; when a
//! step fails for good, completed steps are compensated in reverse. A
//! retryable failure suspends the saga and leaves the order retryable.
//!
//! Between sagas, [`FulfillmentReactor`] advances orders from payment and
//! delivery events, and [`ReconciliationSweep`] repairs steps lost to a
//! crash. Anything neither can decide lands in the [`InterventionQueue`].

pub mod aggregate;
pub mod compensation;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod intervention;
mod log;
pub mod reactor;
pub mod state;
pub mod steps;
pub mod sweep;

pub use aggregate::SagaInstance;
pub use compensation::PaymentCompensation;
pub use coordinator::{
    CoordinatorDeps, FulfillmentOutcome, OrderFulfillmentCoordinator, PlaceOrder,
};
pub use error::{ErrorPayload, SagaError};
pub use events::SagaEvent;
pub use intervention::{Intervention, InterventionKind, InterventionQueue};
pub use reactor::FulfillmentReactor;
pub use state::SagaState;
pub use sweep::{ReconciliationReport, ReconciliationSweep, SweepConfig};
