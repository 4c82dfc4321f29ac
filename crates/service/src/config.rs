//! Process configuration loaded from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use domain::{PaymentConfig, PricingPolicy};
use event_bus::BusConfig;
use saga::SweepConfig;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid value for {key}: {value:?} ({reason})")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected text or json, got {other}")),
        }
    }
}

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json` (default `text`)
/// - `METRICS_ADDR`: Prometheus listener (default `0.0.0.0:9000`)
/// - `TAX_RATE_BPS`: tax in basis points of the subtotal (default `0`)
/// - `GATEWAY_TIMEOUT_MS`: bound on a single charge (default `10000`)
/// - `BUS_MAX_ATTEMPTS`: deliveries per event and subscriber (default `5`)
/// - `BUS_RETRY_BACKOFF_MS`: pause between deliveries (default `50`)
/// - `SWEEP_INTERVAL_SECS`: reconciliation period (default `60`)
/// - `STALE_PAYMENT_SECS`: age at which a PROCESSING capture is flagged (default `300`)
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_addr: SocketAddr,
    pub tax_rate_bps: u32,
    pub gateway_timeout: Duration,
    pub bus_max_attempts: u32,
    pub bus_retry_backoff: Duration,
    pub sweep_interval: Duration,
    pub stale_payment_after: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which returns the raw value of a
    /// variable if it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse(&lookup, "LOG_FORMAT")?.unwrap_or(defaults.log_format),
            metrics_addr: parse(&lookup, "METRICS_ADDR")?.unwrap_or(defaults.metrics_addr),
            tax_rate_bps: parse(&lookup, "TAX_RATE_BPS")?.unwrap_or(defaults.tax_rate_bps),
            gateway_timeout: parse(&lookup, "GATEWAY_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.gateway_timeout),
            bus_max_attempts: parse(&lookup, "BUS_MAX_ATTEMPTS")?
                .unwrap_or(defaults.bus_max_attempts),
            bus_retry_backoff: parse(&lookup, "BUS_RETRY_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.bus_retry_backoff),
            sweep_interval: parse(&lookup, "SWEEP_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            stale_payment_after: parse(&lookup, "STALE_PAYMENT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_payment_after),
        })
    }

    pub fn bus(&self) -> BusConfig {
        BusConfig {
            max_delivery_attempts: self.bus_max_attempts.max(1),
            retry_backoff: self.bus_retry_backoff,
            ..BusConfig::default()
        }
    }

    pub fn payment(&self) -> PaymentConfig {
        PaymentConfig {
            gateway_timeout: self.gateway_timeout,
        }
    }

    pub fn pricing(&self) -> PricingPolicy {
        PricingPolicy::with_tax_rate_bps(self.tax_rate_bps)
    }

    pub fn sweep(&self) -> SweepConfig {
        SweepConfig {
            stale_after: self.stale_payment_after,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            tax_rate_bps: 0,
            gateway_timeout: Duration::from_millis(10_000),
            bus_max_attempts: 5,
            bus_retry_backoff: Duration::from_millis(50),
            sweep_interval: Duration::from_secs(60),
            stale_payment_after: Duration::from_secs(300),
        }
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|err: T::Err| ConfigError {
            key,
            value,
            reason: err.to_string(),
        })
}
