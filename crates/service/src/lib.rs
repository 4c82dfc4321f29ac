//! Process host for the order fulfillment backend.
//!
//! Loads [`Config`] from the environment, installs tracing and the
//! Prometheus exporter, wires the lifecycles behind one
//! [`saga::OrderFulfillmentCoordinator`], replays the store on startup and
//! runs the reconciliation sweep until shutdown.

pub mod app;
pub mod config;
pub mod telemetry;

pub use app::{App, Coordinator};
pub use config::{Config, ConfigError, LogFormat};
