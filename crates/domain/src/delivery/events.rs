//! Delivery domain events.

use chrono::{DateTime, NaiveDate, Utc};
use common::{AggregateId, CustomerId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::value_objects::Address;

use super::{DeliveryStatus, DeliveryType};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DeliveryEvent {
    DeliveryCreated(DeliveryCreatedData),
    DeliveryStatusChanged(DeliveryStatusChangedData),
    DeliveryCompleted(DeliveryCompletedData),
    DeliveryFailed(DeliveryFailedData),
    DeliveryAddressChanged(DeliveryAddressChangedData),
    TrackingNumberAssigned(TrackingNumberAssignedData),
}

impl DomainEvent for DeliveryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DeliveryEvent::DeliveryCreated(_) => "DeliveryCreated",
            DeliveryEvent::DeliveryStatusChanged(_) => "DeliveryStatusChanged",
            DeliveryEvent::DeliveryCompleted(_) => "DeliveryCompleted",
            DeliveryEvent::DeliveryFailed(_) => "DeliveryFailed",
            DeliveryEvent::DeliveryAddressChanged(_) => "DeliveryAddressChanged",
            DeliveryEvent::TrackingNumberAssigned(_) => "TrackingNumberAssigned",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryCreatedData {
    pub delivery_id: AggregateId,
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub address: Address,
    pub delivery_type: DeliveryType,
    pub estimated_delivery_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStatusChangedData {
    pub delivery_id: AggregateId,
    pub order_id: AggregateId,
    pub from: DeliveryStatus,
    pub to: DeliveryStatus,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryCompletedData {
    pub delivery_id: AggregateId,
    pub order_id: AggregateId,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryFailedData {
    pub delivery_id: AggregateId,
    pub order_id: AggregateId,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAddressChangedData {
    pub delivery_id: AggregateId,
    pub order_id: AggregateId,
    pub previous: Address,
    pub address: Address,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingNumberAssignedData {
    pub delivery_id: AggregateId,
    pub order_id: AggregateId,
    pub tracking_number: String,
    pub assigned_at: DateTime<Utc>,
}
