//! DeliveryRequest aggregate.

use chrono::{DateTime, NaiveDate, Utc};
use common::{AggregateId, CustomerId};
use event_store::Version;

use crate::aggregate::Aggregate;
use crate::value_objects::Address;

use super::events::{
    DeliveryAddressChangedData, DeliveryCompletedData, DeliveryCreatedData, DeliveryFailedData,
    DeliveryStatusChangedData, TrackingNumberAssignedData,
};
use super::{DeliveryAction, DeliveryError, DeliveryEvent, DeliveryStatus, DeliveryType};

#[derive(Debug, Clone)]
pub struct CreateDelivery {
    pub delivery_id: AggregateId,
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub address: Address,
    pub delivery_type: DeliveryType,
}

impl CreateDelivery {
    pub fn new(
        order_id: AggregateId,
        customer_id: CustomerId,
        address: Address,
        delivery_type: DeliveryType,
    ) -> Self {
        Self {
            delivery_id: AggregateId::new(),
            order_id,
            customer_id,
            address,
            delivery_type,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeliveryRequest {
    id: Option<AggregateId>,
    version: Version,
    order_id: Option<AggregateId>,
    customer_id: Option<CustomerId>,
    address: Option<Address>,
    delivery_type: DeliveryType,
    status: DeliveryStatus,
    tracking_number: Option<String>,
    estimated_delivery_date: Option<NaiveDate>,
    actual_delivery_date: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl Aggregate for DeliveryRequest {
    type Event = DeliveryEvent;
    type Error = DeliveryError;

    fn aggregate_type() -> &'static str {
        "DeliveryRequest"
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

    fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            DeliveryEvent::DeliveryCreated(data) => {
                self.id = Some(data.delivery_id);
                self.order_id = Some(data.order_id);
                self.customer_id = Some(data.customer_id);
                self.address = Some(data.address);
                self.delivery_type = data.delivery_type;
                self.status = DeliveryStatus::Pending;
                self.estimated_delivery_date = Some(data.estimated_delivery_date);
                self.created_at = Some(data.created_at);
            }
            DeliveryEvent::DeliveryStatusChanged(data) => {
                self.status = data.to;
            }
            DeliveryEvent::DeliveryCompleted(data) => {
                self.actual_delivery_date = Some(data.delivered_at);
            }
            DeliveryEvent::DeliveryFailed(data) => {
                self.failure_reason = Some(data.reason);
            }
            DeliveryEvent::DeliveryAddressChanged(data) => {
                self.address = Some(data.address);
            }
            DeliveryEvent::TrackingNumberAssigned(data) => {
                self.tracking_number = Some(data.tracking_number);
            }
        }
    }
}

// Query methods
impl DeliveryRequest {
    pub fn order_id(&self) -> Option<AggregateId> {
        self.order_id
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn address(&self) -> Option<&Address> {
        self.address.as_ref()
    }

    pub fn delivery_type(&self) -> DeliveryType {
        self.delivery_type
    }

    pub fn status(&self) -> DeliveryStatus {
        self.status
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn estimated_delivery_date(&self) -> Option<NaiveDate> {
        self.estimated_delivery_date
    }

    pub fn actual_delivery_date(&self) -> Option<DateTime<Utc>> {
        self.actual_delivery_date
    }

    /// Reason given for the most recent failure.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

// Command methods (return events)
impl DeliveryRequest {
    pub fn create(&self, cmd: &CreateDelivery) -> Result<Vec<DeliveryEvent>, DeliveryError> {
        if self.id.is_some() {
            return Err(DeliveryError::AlreadyCreated);
        }
        if let Some(field) = cmd.address.missing_field() {
            return Err(DeliveryError::AddressRejected {
                reason: format!("missing {field}"),
            });
        }

        let now = Utc::now();
        Ok(vec![DeliveryEvent::DeliveryCreated(DeliveryCreatedData {
            delivery_id: cmd.delivery_id,
            order_id: cmd.order_id,
            customer_id: cmd.customer_id,
            address: cmd.address.clone(),
            delivery_type: cmd.delivery_type,
            estimated_delivery_date: cmd.delivery_type.estimated_delivery_date(now),
            created_at: now,
        })])
    }

    /// Moves along one edge of the transition table. Reaching DELIVERED or
    /// FAILED also records the completion or failure event.
    pub fn update_status(&self, to: DeliveryStatus) -> Result<Vec<DeliveryEvent>, DeliveryError> {
        match to {
            DeliveryStatus::Delivered => self.deliver(),
            DeliveryStatus::Failed => self.mark_failed("reported by carrier"),
            _ => self.transition(to).map(|event| vec![event]),
        }
    }

    pub fn deliver(&self) -> Result<Vec<DeliveryEvent>, DeliveryError> {
        let changed = self.transition(DeliveryStatus::Delivered)?;
        let (delivery_id, order_id) = self.require_ids()?;
        Ok(vec![
            changed,
            DeliveryEvent::DeliveryCompleted(DeliveryCompletedData {
                delivery_id,
                order_id,
                delivered_at: Utc::now(),
            }),
        ])
    }

    pub fn mark_failed(&self, reason: &str) -> Result<Vec<DeliveryEvent>, DeliveryError> {
        let changed = self.transition(DeliveryStatus::Failed)?;
        let (delivery_id, order_id) = self.require_ids()?;
        Ok(vec![
            changed,
            DeliveryEvent::DeliveryFailed(DeliveryFailedData {
                delivery_id,
                order_id,
                reason: reason.to_string(),
                failed_at: Utc::now(),
            }),
        ])
    }

    pub fn cancel(&self) -> Result<Vec<DeliveryEvent>, DeliveryError> {
        self.transition(DeliveryStatus::Cancelled)
            .map(|event| vec![event])
    }

    /// Assigns or corrects the tracking number once the parcel has left.
    pub fn set_tracking_number(&self, value: &str) -> Result<Vec<DeliveryEvent>, DeliveryError> {
        let (delivery_id, order_id) = self.require_ids()?;
        let value = value.trim();
        if value.is_empty() {
            return Err(DeliveryError::EmptyTrackingNumber);
        }
        // not yet dispatched, or already finished
        if self.status == DeliveryStatus::Pending || self.status.is_completed() {
            return Err(DeliveryError::invalid_state(
                self.status,
                DeliveryAction::AssignTracking,
            ));
        }
        if self.tracking_number.as_deref() == Some(value) {
            return Ok(vec![]);
        }

        Ok(vec![DeliveryEvent::TrackingNumberAssigned(
            TrackingNumberAssignedData {
                delivery_id,
                order_id,
                tracking_number: value.to_string(),
                assigned_at: Utc::now(),
            },
        )])
    }

    pub fn update_address(&self, address: &Address) -> Result<Vec<DeliveryEvent>, DeliveryError> {
        let (delivery_id, order_id) = self.require_ids()?;
        if self.status != DeliveryStatus::Pending {
            return Err(DeliveryError::invalid_state(
                self.status,
                DeliveryAction::ChangeAddress,
            ));
        }
        if let Some(field) = address.missing_field() {
            return Err(DeliveryError::AddressRejected {
                reason: format!("missing {field}"),
            });
        }
        let Some(previous) = self.address.clone() else {
            return Err(DeliveryError::NotCreated);
        };
        if &previous == address {
            return Ok(vec![]);
        }

        Ok(vec![DeliveryEvent::DeliveryAddressChanged(
            DeliveryAddressChangedData {
                delivery_id,
                order_id,
                previous,
                address: address.clone(),
                changed_at: Utc::now(),
            },
        )])
    }

    fn transition(&self, to: DeliveryStatus) -> Result<DeliveryEvent, DeliveryError> {
        let (delivery_id, order_id) = self.require_ids()?;
        if !self.status.can_transition_to(to) {
            return Err(DeliveryError::invalid_state(
                self.status,
                DeliveryAction::MoveTo(to),
            ));
        }
        Ok(DeliveryEvent::DeliveryStatusChanged(
            DeliveryStatusChangedData {
                delivery_id,
                order_id,
                from: self.status,
                to,
                changed_at: Utc::now(),
            },
        ))
    }

    fn require_ids(&self) -> Result<(AggregateId, AggregateId), DeliveryError> {
        self.id
            .zip(self.order_id)
            .ok_or(DeliveryError::NotCreated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Address {
        Address::new("1 Main St", "Springfield", "12345", "US")
    }

    fn delivery_in(path: &[DeliveryStatus]) -> DeliveryRequest {
        let mut delivery = DeliveryRequest::default();
        let cmd = CreateDelivery::new(
            AggregateId::new(),
            CustomerId::new(),
            address(),
            DeliveryType::Express,
        );
        let events = delivery.create(&cmd).unwrap();
        delivery.apply_events(events);
        for &status in path {
            let events = delivery.update_status(status).unwrap();
            delivery.apply_events(events);
        }
        delivery
    }

    #[test]
    fn create_sets_estimate_from_sla() {
        let delivery = delivery_in(&[]);
        assert_eq!(delivery.status(), DeliveryStatus::Pending);
        let created = delivery.created_at().unwrap();
        assert_eq!(
            delivery.estimated_delivery_date(),
            Some(DeliveryType::Express.estimated_delivery_date(created))
        );
    }

    #[test]
    fn pending_to_delivered_names_both_states() {
        let delivery = delivery_in(&[]);
        let err = delivery.update_status(DeliveryStatus::Delivered).unwrap_err();

        assert!(matches!(err, DeliveryError::InvalidDeliveryState { .. }));
        let message = err.to_string();
        assert!(message.contains("PENDING"), "{message}");
        assert!(message.contains("DELIVERED"), "{message}");
    }

    #[test]
    fn full_path_records_delivery_date() {
        let delivery = delivery_in(&[
            DeliveryStatus::InTransit,
            DeliveryStatus::OutForDelivery,
            DeliveryStatus::Delivered,
        ]);
        assert_eq!(delivery.status(), DeliveryStatus::Delivered);
        assert!(delivery.actual_delivery_date().is_some());
        assert!(delivery.is_completed());
    }

    #[test]
    fn failed_delivery_can_restart() {
        let mut delivery = delivery_in(&[DeliveryStatus::InTransit]);
        let events = delivery.mark_failed("address not found").unwrap();
        delivery.apply_events(events);
        assert_eq!(delivery.status(), DeliveryStatus::Failed);
        assert_eq!(delivery.failure_reason(), Some("address not found"));
        assert!(!delivery.is_completed());

        let events = delivery.update_status(DeliveryStatus::InTransit).unwrap();
        delivery.apply_events(events);
        assert_eq!(delivery.status(), DeliveryStatus::InTransit);
        assert!(!delivery.is_completed());
    }

    #[test]
    fn tracking_number_requires_dispatch() {
        let pending = delivery_in(&[]);
        assert!(matches!(
            pending.set_tracking_number("1Z999"),
            Err(DeliveryError::InvalidDeliveryState {
                from: DeliveryStatus::Pending,
                attempted: DeliveryAction::AssignTracking,
            })
        ));

        let mut moving = delivery_in(&[DeliveryStatus::InTransit]);
        let events = moving.set_tracking_number("1Z999").unwrap();
        moving.apply_events(events);
        assert_eq!(moving.tracking_number(), Some("1Z999"));
        assert!(moving.set_tracking_number("1Z999").unwrap().is_empty());
    }

    #[test]
    fn address_locked_after_dispatch() {
        let moving = delivery_in(&[DeliveryStatus::InTransit]);
        let new_address = Address::new("2 Oak Ave", "Springfield", "12345", "US");
        assert!(matches!(
            moving.update_address(&new_address),
            Err(DeliveryError::InvalidDeliveryState {
                from: DeliveryStatus::InTransit,
                attempted: DeliveryAction::ChangeAddress,
            })
        ));
    }

    #[test]
    fn cancel_only_from_pending_or_failed() {
        assert!(delivery_in(&[]).cancel().is_ok());
        assert!(
            delivery_in(&[DeliveryStatus::InTransit, DeliveryStatus::Failed])
                .cancel()
                .is_ok()
        );
        assert!(matches!(
            delivery_in(&[DeliveryStatus::InTransit]).cancel(),
            Err(DeliveryError::InvalidDeliveryState { .. })
        ));
    }

    #[test]
    fn returned_is_completed() {
        let delivery = delivery_in(&[
            DeliveryStatus::InTransit,
            DeliveryStatus::OutForDelivery,
            DeliveryStatus::Returned,
        ]);
        assert!(delivery.is_completed());
        assert!(delivery.update_status(DeliveryStatus::InTransit).is_err());
    }
}
