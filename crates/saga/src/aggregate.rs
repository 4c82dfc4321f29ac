//! Saga instance aggregate.

use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::Aggregate;
use event_store::Version;

use crate::error::SagaError;
use crate::events::SagaEvent;
use crate::state::SagaState;

/// An event-sourced saga instance.
///
/// Records which steps ran, which were compensated, and the ids of the
/// entities the steps produced, so a saga can be inspected after the fact.
#[derive(Debug, Clone, Default)]
pub struct SagaInstance {
    id: Option<AggregateId>,
    version: Version,
    saga_type: String,
    order_id: Option<AggregateId>,
    state: SagaState,
    current_step: Option<String>,
    completed_steps: Vec<String>,
    compensated_steps: Vec<String>,
    failed_compensations: Vec<String>,
    transaction_id: Option<AggregateId>,
    delivery_id: Option<AggregateId>,
    failure_reason: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Aggregate for SagaInstance {
    type Event = SagaEvent;
    type Error = SagaError;

    fn aggregate_type() -> &'static str {
        "Saga"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn order_id(&self) -> Option<AggregateId> {
        self.order_id
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            SagaEvent::SagaStarted(data) => {
                self.id = Some(data.saga_id);
                self.order_id = Some(data.order_id);
                self.saga_type = data.saga_type;
                self.state = SagaState::Running;
                self.started_at = Some(data.started_at);
            }
            SagaEvent::StepStarted(data) => {
                self.current_step = Some(data.step_name);
            }
            SagaEvent::StepCompleted(data) => {
                self.current_step = None;
                self.completed_steps.push(data.step_name);
                if let Some(tx) = data.transaction_id {
                    self.transaction_id = Some(tx);
                }
                if let Some(delivery) = data.delivery_id {
                    self.delivery_id = Some(delivery);
                }
            }
            SagaEvent::StepFailed(data) => {
                self.failure_reason = Some(format!("{}: {}", data.step_name, data.error));
            }
            SagaEvent::CompensationStarted(_) => {
                self.state = SagaState::Compensating;
            }
            SagaEvent::CompensationStepCompleted(data) => {
                self.compensated_steps.push(data.step_name);
            }
            SagaEvent::CompensationStepFailed(data) => {
                self.failed_compensations.push(data.step_name);
            }
            SagaEvent::SagaCompleted(data) => {
                self.state = SagaState::Completed;
                self.finished_at = Some(data.completed_at);
            }
            SagaEvent::SagaSuspended(data) => {
                self.state = SagaState::Suspended;
                self.failure_reason = Some(data.reason);
                self.finished_at = Some(data.suspended_at);
            }
            SagaEvent::SagaFailed(data) => {
                self.state = SagaState::Failed;
                self.failure_reason = Some(data.reason);
                self.finished_at = Some(data.failed_at);
            }
        }
    }
}

// Query methods
impl SagaInstance {
    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn order_id(&self) -> Option<AggregateId> {
        self.order_id
    }

    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    /// The step that started but has not completed, if any.
    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    pub fn compensated_steps(&self) -> &[String] {
        &self.compensated_steps
    }

    pub fn failed_compensations(&self) -> &[String] {
        &self.failed_compensations
    }

    pub fn transaction_id(&self) -> Option<AggregateId> {
        self.transaction_id
    }

    pub fn delivery_id(&self) -> Option<AggregateId> {
        self.delivery_id
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }
}
