//! Delivery requests and their lifecycle.

mod aggregate;
mod carrier;
mod events;
mod service;
mod state;

pub use aggregate::{CreateDelivery, DeliveryRequest};
pub use carrier::{CarrierClient, InMemoryCarrier};
pub use events::{
    DeliveryAddressChangedData, DeliveryCompletedData, DeliveryCreatedData, DeliveryEvent,
    DeliveryFailedData, DeliveryStatusChangedData, TrackingNumberAssignedData,
};
pub use service::DeliveryLifecycle;
pub use state::{DeliveryStatus, DeliveryType};

use common::AggregateId;
use thiserror::Error;

use crate::error::ErrorCode;

/// What was attempted when a delivery rejected a change for its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryAction {
    MoveTo(DeliveryStatus),
    AssignTracking,
    ChangeAddress,
}

impl std::fmt::Display for DeliveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryAction::MoveTo(to) => write!(f, "move to {to}"),
            DeliveryAction::AssignTracking => f.write_str("assign a tracking number"),
            DeliveryAction::ChangeAddress => f.write_str("change the address"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Invalid delivery state: cannot {attempted} from {from}")]
    InvalidDeliveryState {
        from: DeliveryStatus,
        attempted: DeliveryAction,
    },

    #[error("Order {order_id} already has active delivery {delivery_id}")]
    DuplicateActiveDelivery {
        order_id: AggregateId,
        delivery_id: AggregateId,
    },

    #[error("Address rejected: {reason}")]
    AddressRejected { reason: String },

    #[error("Postal code {postal_code} ({country}) is outside the service area")]
    OutOfServiceArea { postal_code: String, country: String },

    #[error("Carrier unavailable: {0}")]
    CarrierUnavailable(String),

    #[error("Tracking number must not be empty")]
    EmptyTrackingNumber,

    #[error("Delivery already created")]
    AlreadyCreated,

    #[error("Delivery has not been created")]
    NotCreated,
}

impl DeliveryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DeliveryError::InvalidDeliveryState { .. } | DeliveryError::AlreadyCreated => ErrorCode::InvalidStateTransition,
            DeliveryError::DuplicateActiveDelivery { .. } => ErrorCode::DuplicateActiveEntity,
            DeliveryError::AddressRejected { .. }
            | DeliveryError::OutOfServiceArea { .. }
            | DeliveryError::EmptyTrackingNumber => ErrorCode::ValidationFailed,
            DeliveryError::CarrierUnavailable(_) => ErrorCode::GatewayFailure,
            DeliveryError::NotCreated => ErrorCode::ResourceNotFound,
        }
    }

    pub(crate) fn invalid_state(from: DeliveryStatus, attempted: DeliveryAction) -> Self {
        DeliveryError::InvalidDeliveryState { from, attempted }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::CarrierUnavailable(_))
    }
}
