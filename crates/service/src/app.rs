//! Wiring of the store, bus, lifecycles and background work.

use std::sync::Arc;

use domain::{InMemoryCarrier, InMemoryPaymentGateway};
use event_bus::{EventBus, RecordingSubscriber};
use event_store::InMemoryEventStore;
use saga::{CoordinatorDeps, InterventionQueue, OrderFulfillmentCoordinator, ReconciliationSweep};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;

pub type Coordinator = OrderFulfillmentCoordinator<InMemoryEventStore>;

/// One process worth of components, built once and shared by reference.
pub struct App {
    config: Config,
    store: InMemoryEventStore,
    coordinator: Arc<Coordinator>,
    audit: Arc<RecordingSubscriber>,
    shutdown: watch::Sender<bool>,
}

impl App {
    pub fn build(config: Config) -> Self {
        let store = InMemoryEventStore::new();
        let bus = EventBus::new(config.bus());
        let deps = CoordinatorDeps {
            gateway: Arc::new(InMemoryPaymentGateway::new()),
            carrier: Arc::new(InMemoryCarrier::new()),
            pricing: config.pricing(),
            payment: config.payment(),
            interventions: InterventionQueue::new(),
        };
        let coordinator = Arc::new(OrderFulfillmentCoordinator::new(store.clone(), bus, deps));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            store,
            coordinator,
            audit: Arc::new(RecordingSubscriber::only(&[
                "OrderCancelled",
                "OrderRefunded",
                "PaymentFailed",
                "PaymentRefunded",
                "DeliveryFailed",
            ])),
            shutdown,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Events worth an audit trail, as seen since startup.
    pub fn audit(&self) -> &Arc<RecordingSubscriber> {
        &self.audit
    }

    /// Subscribes the reactor and audit trail, then replays the store so
    /// anything a previous run left half-done is picked up.
    pub async fn start(&self) -> anyhow::Result<u64> {
        self.coordinator.start().await;
        self.coordinator.bus().subscribe(self.audit.clone()).await;

        let replayed = self.coordinator.bus().replay(&self.store).await?;
        tracing::info!(replayed, "startup replay published");
        Ok(replayed)
    }

    /// Runs the reconciliation sweep every `sweep_interval` until
    /// [`App::shutdown`] is called.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let sweep = self.coordinator.sweep(self.config.sweep());
        let period = self.config.sweep_interval;
        let mut stop = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => run_sweep(&sweep).await,
                    _ = stop.changed() => break,
                }
            }
            tracing::debug!("reconciliation sweeper stopped");
        })
    }

    /// Stops background work and drains queued bus deliveries.
    pub async fn shutdown(&self) {
        // No receivers left simply means nothing is running.
        let _ = self.shutdown.send(true);
        self.coordinator.bus().quiesce().await;

        let dead = self.coordinator.bus().drain_dead_letters().await;
        for letter in &dead {
            tracing::warn!(
                subscriber = %letter.subscriber,
                event_type = %letter.event.event_type,
                aggregate_id = %letter.event.aggregate_id,
                error = %letter.error,
                "undelivered event at shutdown"
            );
        }
        let open = self.coordinator.interventions().len().await;
        tracing::info!(dead_letters = dead.len(), open_interventions = open, "shutdown complete");
    }
}

async fn run_sweep(sweep: &ReconciliationSweep<InMemoryEventStore>) {
    match sweep.run_once().await {
        Ok(report) => tracing::debug!(?report, "reconciliation sweep"),
        Err(err) => tracing::error!(error = %err, "reconciliation sweep failed"),
    }
}
