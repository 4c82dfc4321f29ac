//! Append-only record of one saga run.

use std::future::Future;
use std::time::Instant;

use common::AggregateId;
use domain::{Aggregate, DomainError, DomainEvent};
use event_store::{AppendOptions, EventEnvelope, EventStore, Version};

use crate::aggregate::SagaInstance;
use crate::error::SagaError;
use crate::events::SagaEvent;
use crate::state::SagaState;

/// Why a saga run stopped early.
pub(crate) enum Halt {
    /// A step was rejected by its lifecycle.
    Step {
        step: &'static str,
        error: DomainError,
    },
    /// The saga log itself could not be written.
    Log(SagaError),
}

impl From<SagaError> for Halt {
    fn from(err: SagaError) -> Self {
        Halt::Log(err)
    }
}

/// Persists saga events one at a time as the run progresses, keeping the
/// folded [`SagaInstance`] alongside.
pub(crate) struct SagaLog<'a, S: EventStore> {
    store: &'a S,
    saga_id: AggregateId,
    order_id: AggregateId,
    saga: SagaInstance,
    started: Instant,
}

impl<'a, S: EventStore> SagaLog<'a, S> {
    pub async fn start(
        store: &'a S,
        saga_type: &'static str,
        order_id: AggregateId,
    ) -> Result<Self, SagaError> {
        metrics::counter!("saga_executions_total", "saga_type" => saga_type).increment(1);
        let saga_id = AggregateId::new();
        let mut log = Self {
            store,
            saga_id,
            order_id,
            saga: SagaInstance::default(),
            started: Instant::now(),
        };
        log.record(SagaEvent::saga_started(saga_id, order_id, saga_type))
            .await?;
        tracing::info!(%saga_id, %order_id, saga_type, "saga started");
        Ok(log)
    }

    pub fn saga(&self) -> &SagaInstance {
        &self.saga
    }

    pub fn saga_id(&self) -> AggregateId {
        self.saga_id
    }

    pub fn order_id(&self) -> AggregateId {
        self.order_id
    }

    pub async fn record(&mut self, event: SagaEvent) -> Result<(), SagaError> {
        let current = self.saga.version();
        let mut next = self.saga.clone();
        next.apply(event.clone());

        let envelope = EventEnvelope::builder()
            .event_type(event.event_type())
            .aggregate_id(self.saga_id)
            .aggregate_type(SagaInstance::aggregate_type())
            .version(current.next())
            .order_id(self.order_id)
            .payload(&event)?
            .build()?;

        let options = if current == Version::initial() {
            AppendOptions::expect_new()
        } else {
            AppendOptions::expect_version(current)
        };
        let new_version = self.store.append(vec![envelope], options).await?;
        next.set_version(new_version);
        self.saga = next;

        if self.saga.state().is_terminal() {
            self.finish();
        }
        Ok(())
    }

    /// Runs one step, bracketing it with `StepStarted` and either the
    /// event built by `completed` or `StepFailed`.
    pub async fn step<T, F>(
        &mut self,
        step: &'static str,
        action: F,
        completed: impl FnOnce(&T) -> SagaEvent,
    ) -> Result<T, Halt>
    where
        F: Future<Output = Result<T, DomainError>>,
    {
        self.record(SagaEvent::step_started(step)).await?;
        tracing::debug!(saga_id = %self.saga_id, step, "saga step started");

        match action.await {
            Ok(value) => {
                self.record(completed(&value)).await?;
                tracing::info!(saga_id = %self.saga_id, step, "saga step completed");
                Ok(value)
            }
            Err(error) => {
                self.record(SagaEvent::step_failed(step, &error)).await?;
                tracing::warn!(saga_id = %self.saga_id, step, error = %error, "saga step failed");
                Err(Halt::Step { step, error })
            }
        }
    }

    fn finish(&self) {
        let saga_type = self.saga.saga_type().to_string();
        metrics::histogram!("saga_duration_seconds", "saga_type" => saga_type.clone())
            .record(self.started.elapsed().as_secs_f64());
        match self.saga.state() {
            SagaState::Completed => {
                metrics::counter!("saga_completed", "saga_type" => saga_type).increment(1);
                tracing::info!(saga_id = %self.saga_id(), "saga completed");
            }
            SagaState::Suspended => {
                metrics::counter!("saga_suspended", "saga_type" => saga_type).increment(1);
                tracing::warn!(
                    saga_id = %self.saga_id(),
                    reason = self.saga.failure_reason().unwrap_or_default(),
                    "saga suspended"
                );
            }
            _ => {
                metrics::counter!("saga_failed", "saga_type" => saga_type).increment(1);
                tracing::warn!(
                    saga_id = %self.saga_id(),
                    reason = self.saga.failure_reason().unwrap_or_default(),
                    "saga failed"
                );
            }
        }
    }
}
