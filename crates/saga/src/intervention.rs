//! Items that need an operator's decision.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterventionKind {
    /// A delivery failed; nobody decides automatically whether to retry,
    /// return or refund.
    DeliveryFailed,
    /// A compensating action could not be applied.
    CompensationFailed,
    /// A payment has been PROCESSING for too long; its outcome is unknown.
    StuckPayment,
    /// A refund was requested but its confirmation never got recorded.
    UnconfirmedRefund,
}

impl InterventionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterventionKind::DeliveryFailed => "DELIVERY_FAILED",
            InterventionKind::CompensationFailed => "COMPENSATION_FAILED",
            InterventionKind::StuckPayment => "STUCK_PAYMENT",
            InterventionKind::UnconfirmedRefund => "UNCONFIRMED_REFUND",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intervention {
    pub id: Uuid,
    pub kind: InterventionKind,
    pub order_id: AggregateId,
    /// The delivery, transaction or saga the item is about.
    pub subject_id: AggregateId,
    pub detail: String,
    pub raised_at: DateTime<Utc>,
}

/// Shared queue of open interventions. Constructed once per process and
/// handed to every component that raises items.
#[derive(Debug, Clone, Default)]
pub struct InterventionQueue {
    items: Arc<Mutex<Vec<Intervention>>>,
}

impl InterventionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an item unless one of the same kind is already open for the
    /// subject. Returns whether a new item was opened.
    pub async fn raise(
        &self,
        kind: InterventionKind,
        order_id: AggregateId,
        subject_id: AggregateId,
        detail: impl Into<String>,
    ) -> bool {
        let mut items = self.items.lock().await;
        if items
            .iter()
            .any(|item| item.kind == kind && item.subject_id == subject_id)
        {
            return false;
        }

        let detail = detail.into();
        tracing::warn!(kind = kind.as_str(), %order_id, %subject_id, %detail, "operator intervention raised");
        metrics::counter!("interventions_raised_total", "kind" => kind.as_str()).increment(1);
        items.push(Intervention {
            id: Uuid::new_v4(),
            kind,
            order_id,
            subject_id,
            detail,
            raised_at: Utc::now(),
        });
        true
    }

    pub async fn open(&self) -> Vec<Intervention> {
        self.items.lock().await.clone()
    }

    pub async fn open_for_order(&self, order_id: AggregateId) -> Vec<Intervention> {
        self.items
            .lock()
            .await
            .iter()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect()
    }

    /// Closes an item. Returns it if it was open.
    pub async fn resolve(&self, id: Uuid) -> Option<Intervention> {
        let mut items = self.items.lock().await;
        let index = items.iter().position(|item| item.id == id)?;
        Some(items.remove(index))
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}
