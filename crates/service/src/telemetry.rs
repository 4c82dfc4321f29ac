//! Tracing and metrics initialisation.

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, LogFormat};

/// Installs the global tracing subscriber. `RUST_LOG` syntax applies to
/// `config.log_level`.
pub fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&config.log_level)
        .with_context(|| format!("invalid log filter {:?}", config.log_level))?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    }
    .context("tracing subscriber already installed")
}

/// Installs the Prometheus recorder and its scrape listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(config: &Config) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(config.metrics_addr)
        .install()
        .with_context(|| format!("failed to start metrics listener on {}", config.metrics_addr))?;
    describe_metrics();
    tracing::info!(addr = %config.metrics_addr, "metrics listener started");
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!("order_transitions_total", "Order status transitions by target status");
    metrics::describe_counter!("payment_captures_total", "Settled captures by outcome");
    metrics::describe_counter!("payment_refunds_total", "Accepted refunds");
    metrics::describe_counter!(
        "payment_refunds_unrecorded_total",
        "Refunds sent by the gateway whose confirmation could not be stored"
    );
    metrics::describe_counter!(
        "payment_late_captures_total",
        "Charges that succeeded after the capture timed out, by whether they were voided"
    );
    metrics::describe_counter!(
        "payment_results_discarded_total",
        "Gateway answers that arrived after the transaction was cancelled"
    );
    metrics::describe_counter!("delivery_transitions_total", "Delivery status transitions by target status");
    metrics::describe_counter!("event_bus_published_total", "Events published on the bus");
    metrics::describe_counter!("event_bus_dead_letters_total", "Events a subscriber gave up on");
    metrics::describe_counter!("saga_executions_total", "Sagas started by type");
    metrics::describe_histogram!(
        "saga_duration_seconds",
        metrics::Unit::Seconds,
        "Time from saga start to its terminal state"
    );
    metrics::describe_counter!("reconciliation_repairs_total", "Steps finished by the sweep");
    metrics::describe_counter!("interventions_raised_total", "Items raised for an operator");
}
