//! Service entry point.

use anyhow::Context;
use service::{App, Config, telemetry};
use tokio::signal;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("failed to install SIGINT handler")?;
                tracing::info!("received SIGINT, starting graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::info!("received SIGTERM, starting graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("failed to install SIGINT handler")?;
        tracing::info!("received SIGINT, starting graceful shutdown");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    telemetry::init_tracing(&config)?;
    telemetry::init_metrics(&config)?;
    tracing::info!(?config, "configuration loaded");

    let app = App::build(config);
    app.start().await?;
    let sweeper = app.spawn_sweeper();

    shutdown_signal().await?;
    app.shutdown().await;
    sweeper.await.context("sweeper task panicked")?;

    tracing::info!("service shut down gracefully");
    Ok(())
}
