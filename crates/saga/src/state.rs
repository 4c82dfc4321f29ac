//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of a saga in its lifecycle.
///
/// ```text
/// NotStarted ──► Running ──┬──► Completed
///                          ├──► Suspended
///                          └──► Compensating ──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    #[default]
    NotStarted,

    /// Steps are being executed.
    Running,

    /// A step failed and completed steps are being reversed.
    Compensating,

    /// Stopped on a retryable failure without compensating. The entities
    /// are left where a later attempt can resume them.
    Suspended,

    /// All steps completed (terminal).
    Completed,

    /// Compensation finished after a failure (terminal).
    Failed,
}

impl SagaState {
    pub fn can_run(&self) -> bool {
        matches!(self, SagaState::NotStarted)
    }

    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::Failed | SagaState::Suspended
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::NotStarted => "NotStarted",
            SagaState::Running => "Running",
            SagaState::Compensating => "Compensating",
            SagaState::Suspended => "Suspended",
            SagaState::Completed => "Completed",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
