use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use event_store::{EventEnvelope, EventStore};
use futures_util::StreamExt;
use tokio::sync::{Mutex, Notify, RwLock, mpsc};

use crate::{BusEvent, Result, Subscriber};

/// Redelivery policy for failing handlers.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Total attempts per subscriber per event, including the first.
    pub max_delivery_attempts: u32,
    pub retry_backoff: Duration,
    /// Dead letters kept for inspection; the oldest is dropped beyond this.
    pub dead_letter_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: 5,
            retry_backoff: Duration::from_millis(50),
            dead_letter_capacity: 1_000,
        }
    }
}

/// An event a subscriber could not handle.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub subscriber: String,
    pub event: BusEvent,
    pub error: String,
    pub attempts: u32,
}

struct Route {
    subscriber: Arc<dyn Subscriber>,
    queue: mpsc::UnboundedSender<BusEvent>,
}

struct Shared {
    config: BusConfig,
    routes: RwLock<Vec<Route>>,
    pending: AtomicUsize,
    idle: Notify,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
}

impl Shared {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Fans committed events out to subscribers.
///
/// Every subscriber owns an unbounded queue drained by its own task, so
/// `publish` never waits on handler work and one slow subscriber never
/// delays another. Within a subscriber, events arrive in publish order.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                routes: RwLock::new(Vec::new()),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
                dead_letters: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Registers a subscriber and starts its delivery task.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver_loop(
            Arc::clone(&self.shared),
            Arc::clone(&subscriber),
            rx,
        ));

        tracing::info!(subscriber = subscriber.name(), "subscriber registered");
        self.shared.routes.write().await.push(Route {
            subscriber,
            queue: tx,
        });
    }

    pub async fn subscriber_count(&self) -> usize {
        self.shared.routes.read().await.len()
    }

    /// Queues an event for every interested subscriber.
    pub async fn publish(&self, event: BusEvent) {
        let routes = self.shared.routes.read().await;
        for route in routes.iter() {
            if !route.subscriber.interested_in(&event.event_type) {
                continue;
            }
            self.shared.pending.fetch_add(1, Ordering::AcqRel);
            if route.queue.send(event.clone()).is_err() {
                tracing::warn!(
                    subscriber = route.subscriber.name(),
                    "delivery task gone, event dropped"
                );
                self.shared.finish_one();
            }
        }
        metrics::counter!("event_bus_published_total", "event_type" => event.event_type.clone())
            .increment(1);
    }

    /// Publishes committed envelopes in order.
    pub async fn publish_envelopes(&self, envelopes: &[EventEnvelope]) {
        for envelope in envelopes {
            self.publish(BusEvent::from_envelope(envelope)).await;
        }
    }

    /// Re-publishes every stored event, oldest first. Returns how many.
    #[tracing::instrument(skip(self, store))]
    pub async fn replay<S: EventStore + ?Sized>(&self, store: &S) -> Result<u64> {
        let mut stream = store.stream_all_events().await?;
        let mut replayed = 0u64;

        while let Some(result) = stream.next().await {
            let envelope = result?;
            self.publish(BusEvent::from_envelope(&envelope)).await;
            replayed += 1;
        }

        tracing::info!(events = replayed, "replay complete");
        Ok(replayed)
    }

    /// Waits until every queued delivery has finished, including retries.
    pub async fn quiesce(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.dead_letters.lock().await.iter().cloned().collect()
    }

    /// Removes and returns the parked dead letters, oldest first.
    pub async fn drain_dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.dead_letters.lock().await.drain(..).collect()
    }
}

async fn deliver_loop(
    shared: Arc<Shared>,
    subscriber: Arc<dyn Subscriber>,
    mut rx: mpsc::UnboundedReceiver<BusEvent>,
) {
    while let Some(event) = rx.recv().await {
        deliver(&shared, subscriber.as_ref(), event).await;
        shared.finish_one();
    }
}

async fn deliver(shared: &Shared, subscriber: &dyn Subscriber, event: BusEvent) {
    let max_attempts = shared.config.max_delivery_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match subscriber.handle(&event).await {
            Ok(()) => return,
            Err(err) => err,
        };

        if err.is_retryable() && attempt < max_attempts {
            tracing::warn!(
                subscriber = subscriber.name(),
                event_type = %event.event_type,
                aggregate_id = %event.aggregate_id,
                attempt,
                error = %err,
                "handler failed, retrying"
            );
            tokio::time::sleep(shared.config.retry_backoff).await;
            continue;
        }

        tracing::error!(
            subscriber = subscriber.name(),
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            attempts = attempt,
            error = %err,
            "event dead-lettered"
        );
        metrics::counter!("event_bus_dead_letters_total", "subscriber" => subscriber.name().to_string())
            .increment(1);
        let mut parked = shared.dead_letters.lock().await;
        if parked.len() >= shared.config.dead_letter_capacity {
            if let Some(dropped) = parked.pop_front() {
                tracing::warn!(
                    subscriber = %dropped.subscriber,
                    event_type = %dropped.event.event_type,
                    aggregate_id = %dropped.event.aggregate_id,
                    "dead letter capacity reached, oldest dropped"
                );
            }
        }
        if shared.config.dead_letter_capacity > 0 {
            parked.push_back(DeadLetter {
                subscriber: subscriber.name().to_string(),
                event,
                error: err.to_string(),
                attempts: attempt,
            });
        }
        return;
    }
}
