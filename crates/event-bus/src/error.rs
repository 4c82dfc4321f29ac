use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    #[error("Event payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// A subscriber failed to handle an event.
    #[error("Handler error: {message}")]
    Handler { message: String, retryable: bool },
}

impl BusError {
    /// A handler failure worth another delivery attempt.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
            retryable: true,
        }
    }

    /// A handler failure that no redelivery can fix.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EventStore(_) => true,
            Self::Payload(_) => false,
            Self::Handler { retryable, .. } => *retryable,
        }
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
